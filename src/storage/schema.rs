//! Database schema and migrations.

use anyhow::{bail, Result};
use rusqlite::Connection;

use crate::config::is_sql_identifier;

const SCHEMA_VERSION: i64 = 1;

/// Create the anomaly table and its indexes if absent. Safe to run on every
/// startup.
pub fn migrate(conn: &Connection, table: &str) -> Result<()> {
    // The table name is spliced into DDL; refuse anything but an identifier.
    if !is_sql_identifier(table) {
        bail!("refusing to create table with name {:?}", table);
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS {t} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vin TEXT NOT NULL,
            kafka_timestamp INTEGER NOT NULL,
            sig_timestamp INTEGER NOT NULL,
            anomaly_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            description TEXT,
            sig_name TEXT NOT NULL,
            current_value TEXT,
            threshold_value TEXT,
            additional_info TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_{t}_vin ON {t}(vin);
        CREATE INDEX IF NOT EXISTS idx_{t}_kafka_timestamp ON {t}(kafka_timestamp);
        CREATE INDEX IF NOT EXISTS idx_{t}_sig_timestamp ON {t}(sig_timestamp);
        CREATE INDEX IF NOT EXISTS idx_{t}_anomaly_type ON {t}(anomaly_type);
        CREATE INDEX IF NOT EXISTS idx_{t}_severity ON {t}(severity);
        CREATE INDEX IF NOT EXISTS idx_{t}_sig_name ON {t}(sig_name);",
        t = table
    ))?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_table_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, "anomaly_data").unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM anomaly_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'anomaly_data' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 6);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, "anomaly_data").unwrap();
        migrate(&conn, "anomaly_data").unwrap(); // Should not error

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_migrate_rejects_injection() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(migrate(&conn, "x; DROP TABLE y").is_err());
    }
}
