//! TOML configuration for vehguard.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working configuration pointed at local services.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detect::DetectionThresholds;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "VEHGUARD_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/vehguard/vehguard.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("detection.window_ms must be at least {min} ms, got {got}")]
    WindowTooSmall { min: i64, got: i64 },
    #[error("detection.{name} must be a positive number, got {got}")]
    BadThreshold { name: &'static str, got: f64 },
    #[error("relational.table {0:?} is not a plain SQL identifier")]
    BadTableName(String),
    #[error("queue.queue_key must not be empty")]
    EmptyQueueKey,
    #[error("{0} must be at least 1")]
    ZeroSize(&'static str),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehguardConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VehguardConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (from the command line); failures are returned.
    /// 2. The file named by `VEHGUARD_CONFIG`.
    /// 3. `/etc/vehguard/vehguard.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "VEHGUARD_CONFIG set but file could not be loaded, trying fallback"
                ),
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => warn!(
                    path = %system_path.display(),
                    error = %format!("{:#}", e),
                    "system config file exists but could not be loaded, using defaults"
                ),
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        // Both rule look-backs must be retained by the window.
        let min = crate::detect::engine::LONG_RANGE_MS;
        if d.window_ms < min {
            return Err(ConfigError::WindowTooSmall { min, got: d.window_ms });
        }
        for (name, got) in [("threshold_1s", d.threshold_1s), ("threshold_2s", d.threshold_2s)] {
            if !(got.is_finite() && got > 0.0) {
                return Err(ConfigError::BadThreshold { name, got });
            }
        }
        if !is_sql_identifier(&self.relational.table) {
            return Err(ConfigError::BadTableName(self.relational.table.clone()));
        }
        if self.queue.queue_key.trim().is_empty() {
            return Err(ConfigError::EmptyQueueKey);
        }
        for (name, v) in [
            ("pipeline.workers", self.pipeline.workers),
            ("pipeline.channel_capacity", self.pipeline.channel_capacity),
            ("queue.pool_size", self.queue.pool_size as usize),
            ("relational.pool_size", self.relational.pool_size as usize),
        ] {
            if v == 0 {
                return Err(ConfigError::ZeroSize(name));
            }
        }
        Ok(())
    }
}

pub(crate) fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Per-vehicle speed history retention (ms).
    pub window_ms: i64,
    /// Speed delta (m/s) that raises SPEED_CHANGE_1S.
    pub threshold_1s: f64,
    /// Speed delta (m/s) that raises SPEED_CHANGE_2S.
    pub threshold_2s: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let t = DetectionThresholds::default();
        Self {
            window_ms: t.window_ms,
            threshold_1s: t.speed_delta_1s,
            threshold_2s: t.speed_delta_2s,
        }
    }
}

impl DetectionConfig {
    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            window_ms: self.window_ms,
            speed_delta_1s: self.threshold_1s,
            speed_delta_2s: self.threshold_2s,
        }
    }
}

// ---------------------------------------------------------------------------
// Primary store (durable queue)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Redis connection URL, e.g. `redis://:password@host:6379/0`.
    pub url: String,
    /// List that anomalies are pushed onto.
    pub queue_key: String,
    pub pool_size: u32,
    pub connect_timeout_ms: u64,
    /// Backlog length at which health checks start warning.
    pub backlog_alert_threshold: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            queue_key: "vehicle_anomaly_queue".to_string(),
            pool_size: 10,
            connect_timeout_ms: 5000,
            backlog_alert_threshold: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback store (relational)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// SQLite database file.
    pub path: PathBuf,
    pub table: String,
    pub pool_size: u32,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/vehguard.db"),
            table: "anomaly_data".to_string(),
            pool_size: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of keyed partitions processed in parallel.
    pub workers: usize,
    /// Per-partition channel depth.
    pub channel_capacity: usize,
    /// Window state checkpoint file; checkpointing is off when unset.
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_capacity: 1024,
            checkpoint_path: None,
            checkpoint_interval_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// API / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address for the health/stats endpoints; disabled when unset.
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = VehguardConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.detection.window_ms, 30_000);
        assert_eq!(cfg.detection.threshold_1s, 18.0);
        assert_eq!(cfg.detection.threshold_2s, 24.0);
        assert_eq!(cfg.queue.queue_key, "vehicle_anomaly_queue");
        assert_eq!(cfg.relational.table, "anomaly_data");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: VehguardConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.pipeline.workers, 4);
        assert!(cfg.api.bind.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let cfg: VehguardConfig = toml::from_str(
            r#"
            [detection]
            threshold_1s = 15.5

            [relational]
            table = "alerts"

            [pipeline]
            checkpoint_path = "/tmp/state.json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detection.threshold_1s, 15.5);
        assert_eq!(cfg.detection.threshold_2s, 24.0);
        assert_eq!(cfg.relational.table, "alerts");
        assert_eq!(cfg.relational.pool_size, 4);
        assert_eq!(cfg.pipeline.checkpoint_path, Some(PathBuf::from("/tmp/state.json")));
        assert_eq!(cfg.detection.thresholds().speed_delta_1s, 15.5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = VehguardConfig::default();
        cfg.detection.window_ms = 1_000;
        assert!(matches!(cfg.validate(), Err(ConfigError::WindowTooSmall { .. })));

        let mut cfg = VehguardConfig::default();
        cfg.detection.threshold_2s = -1.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::BadThreshold { name: "threshold_2s", .. })));

        let mut cfg = VehguardConfig::default();
        cfg.relational.table = "anomalies; DROP TABLE x".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::BadTableName(_))));

        let mut cfg = VehguardConfig::default();
        cfg.queue.queue_key = " ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyQueueKey));

        let mut cfg = VehguardConfig::default();
        cfg.pipeline.workers = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSize("pipeline.workers")));
    }

    #[test]
    fn test_sql_identifier() {
        assert!(is_sql_identifier("anomaly_data"));
        assert!(is_sql_identifier("_t2"));
        assert!(!is_sql_identifier("2t"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("a-b"));
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[queue]\nqueue_key = \"q1\"\n[logging]\njson = true").unwrap();
        let cfg = VehguardConfig::load(f.path()).unwrap();
        assert_eq!(cfg.queue.queue_key, "q1");
        assert!(cfg.logging.json);

        let cfg = VehguardConfig::resolve(Some(f.path())).unwrap();
        assert_eq!(cfg.queue.queue_key, "q1");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[detection]\nwindow_ms = 10").unwrap();
        assert!(VehguardConfig::load(f.path()).is_err());
        assert!(VehguardConfig::resolve(Some(Path::new("/nonexistent/vehguard.toml"))).is_err());
    }
}
