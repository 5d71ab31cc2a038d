//! SQLite storage layer -- pool, schema, and the relational anomaly table
//! used as the sink's fallback store.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::Serialize;

use crate::config::RelationalConfig;
use crate::detect::AnomalyRecord;
use crate::sink::{RowStore, SinkError};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database, make sure `table` exists, and
/// return a connection pool.
pub fn open_pool(path: &Path, pool_size: u32, table: &str) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn, table)?;

    Ok(pool)
}

/// One anomaly flattened into the fallback table's columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRow {
    pub vin: String,
    pub kafka_timestamp: i64,
    pub sig_timestamp: i64,
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    pub sig_name: String,
    pub current_value: String,
    pub threshold_value: String,
    pub additional_info: String,
    /// Assigned by the database; absent until the row is read back.
    pub created_at: Option<String>,
}

impl From<&AnomalyRecord> for AnomalyRow {
    fn from(r: &AnomalyRecord) -> Self {
        Self {
            vin: r.vin.clone(),
            kafka_timestamp: r.ingestion_ts,
            sig_timestamp: r.event_ts,
            anomaly_type: r.kind.as_str().to_string(),
            severity: r.severity.as_str().to_string(),
            description: r.description.clone(),
            sig_name: r.signal_name.clone(),
            current_value: r.current_value.to_text(),
            threshold_value: r.threshold_value.to_text(),
            additional_info: r.context.clone(),
            created_at: None,
        }
    }
}

/// Relational fallback store backed by a SQLite table.
pub struct AnomalyTable {
    pool: Pool,
    table: String,
    insert_sql: String,
}

impl AnomalyTable {
    /// Open the configured database and ensure the table exists.
    pub fn open(cfg: &RelationalConfig) -> Result<Self> {
        let pool = open_pool(&cfg.path, cfg.pool_size, &cfg.table)?;
        Ok(Self::from_pool(pool, &cfg.table))
    }

    /// Wrap an already-migrated pool.
    pub fn from_pool(pool: Pool, table: &str) -> Self {
        let insert_sql = format!(
            "INSERT INTO {} (vin, kafka_timestamp, sig_timestamp, anomaly_type, severity, description, sig_name, current_value, threshold_value, additional_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            table
        );
        Self {
            pool,
            table: table.to_string(),
            insert_sql,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Most recent rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AnomalyRow>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT vin, kafka_timestamp, sig_timestamp, anomaly_type, severity, description, sig_name,
                    current_value, threshold_value, additional_info, created_at
             FROM {} ORDER BY id DESC LIMIT ?1",
            self.table
        ))?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(AnomalyRow {
                vin: row.get(0)?,
                kafka_timestamp: row.get(1)?,
                sig_timestamp: row.get(2)?,
                anomaly_type: row.get(3)?,
                severity: row.get(4)?,
                description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                sig_name: row.get(6)?,
                current_value: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                threshold_value: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                additional_info: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                created_at: row.get(10)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }
}

impl RowStore for AnomalyTable {
    fn insert(&self, row: &AnomalyRow) -> Result<(), SinkError> {
        let conn = self.pool.get()?;
        conn.execute(
            &self.insert_sql,
            params![
                row.vin,
                row.kafka_timestamp,
                row.sig_timestamp,
                row.anomaly_type,
                row.severity,
                row.description,
                row.sig_name,
                row.current_value,
                row.threshold_value,
                row.additional_info,
            ],
        )?;
        Ok(())
    }

    fn ping(&self) -> Result<(), SinkError> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite table {}", self.table)
    }
}
