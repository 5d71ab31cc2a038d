//! Dual-destination anomaly sink.
//!
//! Every record goes to the durable queue first. Only when that attempt
//! fails is the record inserted into the relational table, so a record lands
//! in exactly one store or, if both are down, is dropped with an error log.

pub mod queue;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::VehguardConfig;
use crate::detect::AnomalyRecord;
use crate::metrics::Metrics;
use crate::storage::{AnomalyRow, AnomalyTable};
use self::queue::RedisQueue;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{0} store is not connected")]
    Unavailable(&'static str),
    #[error("failed to serialize anomaly: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("queue command failed: {0}")]
    Queue(#[from] redis::RedisError),
    #[error("database write failed: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool exhausted or broken: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Preferred, low-latency store: a named durable queue.
pub trait QueueStore: Send + Sync {
    /// Append one serialized record to the queue.
    fn push(&self, payload: &str) -> Result<(), SinkError>;
    /// Number of records waiting in the queue.
    fn backlog(&self) -> Result<u64, SinkError>;
    fn ping(&self) -> Result<(), SinkError>;
    fn describe(&self) -> String;
}

/// Secondary store used only when the queue rejects a record.
pub trait RowStore: Send + Sync {
    fn insert(&self, row: &AnomalyRow) -> Result<(), SinkError>;
    fn ping(&self) -> Result<(), SinkError>;
    fn describe(&self) -> String;
}

/// Result of one [`ResilientDualSink::write`], with the error of each step
/// that failed.
#[derive(Debug)]
pub enum WriteOutcome {
    Primary,
    Fallback { primary_error: SinkError },
    Dropped { primary_error: SinkError, fallback_error: SinkError },
}

impl WriteOutcome {
    pub fn is_persisted(&self) -> bool {
        !matches!(self, WriteOutcome::Dropped { .. })
    }

    /// Label used for the `outcome` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Primary => "primary",
            WriteOutcome::Fallback { .. } => "fallback",
            WriteOutcome::Dropped { .. } => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkHealth {
    pub status: HealthStatus,
    pub queue: bool,
    pub relational: bool,
    pub queue_backlog: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub primary: u64,
    pub fallback: u64,
    pub dropped: u64,
}

const QUEUE: &str = "queue";
const RELATIONAL: &str = "relational";

pub struct ResilientDualSink {
    primary: Option<Box<dyn QueueStore>>,
    fallback: Option<Box<dyn RowStore>>,
    backlog_alert_threshold: Option<u64>,
    metrics: Arc<Metrics>,
}

impl ResilientDualSink {
    pub fn new(
        primary: Option<Box<dyn QueueStore>>,
        fallback: Option<Box<dyn RowStore>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            primary,
            fallback,
            backlog_alert_threshold: None,
            metrics,
        }
    }

    pub fn with_backlog_alert(mut self, threshold: u64) -> Self {
        self.backlog_alert_threshold = Some(threshold);
        self
    }

    /// Acquire both store connections. A store that cannot be reached is
    /// left out and writes degrade accordingly; this never fails.
    pub fn connect(cfg: &VehguardConfig, metrics: Arc<Metrics>) -> Self {
        let primary: Option<Box<dyn QueueStore>> = match RedisQueue::connect(&cfg.queue) {
            Ok(q) => {
                info!(store = %q.describe(), "queue connection established");
                Some(Box::new(q))
            }
            Err(e) => {
                warn!(url = %cfg.queue.url, error = %format!("{:#}", e), "queue unavailable, anomalies go to the relational store");
                None
            }
        };

        let fallback: Option<Box<dyn RowStore>> = match AnomalyTable::open(&cfg.relational) {
            Ok(t) => {
                info!(store = %t.describe(), path = %cfg.relational.path.display(), "relational connection established");
                Some(Box::new(t))
            }
            Err(e) => {
                warn!(path = %cfg.relational.path.display(), error = %format!("{:#}", e), "relational store unavailable");
                None
            }
        };

        if primary.is_none() && fallback.is_none() {
            error!("no anomaly store is reachable; detected anomalies will be lost");
        }

        Self::new(primary, fallback, metrics).with_backlog_alert(cfg.queue.backlog_alert_threshold)
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Persist one record: queue first, relational table only on failure.
    pub fn write(&self, record: &AnomalyRecord) -> WriteOutcome {
        let outcome = self.write_inner(record);
        self.metrics
            .sink_writes_total
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    fn write_inner(&self, record: &AnomalyRecord) -> WriteOutcome {
        let primary_error = match self.try_primary(record) {
            Ok(()) => {
                debug!(vin = %record.vin, kind = %record.kind, "anomaly queued");
                return WriteOutcome::Primary;
            }
            Err(e) => e,
        };
        warn!(vin = %record.vin, kind = %record.kind, error = %primary_error, "queue write failed, falling back");

        match self.try_fallback(record) {
            Ok(()) => {
                debug!(vin = %record.vin, kind = %record.kind, "anomaly stored in relational fallback");
                WriteOutcome::Fallback { primary_error }
            }
            Err(fallback_error) => {
                error!(
                    vin = %record.vin,
                    kind = %record.kind,
                    event_ts = record.event_ts,
                    primary_error = %primary_error,
                    fallback_error = %fallback_error,
                    "anomaly lost: no store accepted it"
                );
                WriteOutcome::Dropped { primary_error, fallback_error }
            }
        }
    }

    fn try_primary(&self, record: &AnomalyRecord) -> Result<(), SinkError> {
        let result = match self.primary.as_ref() {
            Some(queue) => {
                let payload = serde_json::to_string(record)?;
                let timer = self.metrics.store_write_seconds.with_label_values(&[QUEUE]).start_timer();
                let pushed = queue.push(&payload);
                timer.observe_duration();
                pushed
            }
            None => Err(SinkError::Unavailable(QUEUE)),
        };
        if result.is_err() {
            self.metrics.store_errors_total.with_label_values(&[QUEUE]).inc();
        }
        result
    }

    fn try_fallback(&self, record: &AnomalyRecord) -> Result<(), SinkError> {
        let result = match self.fallback.as_ref() {
            Some(table) => {
                let row = AnomalyRow::from(record);
                let timer = self.metrics.store_write_seconds.with_label_values(&[RELATIONAL]).start_timer();
                let inserted = table.insert(&row);
                timer.observe_duration();
                inserted
            }
            None => Err(SinkError::Unavailable(RELATIONAL)),
        };
        if result.is_err() {
            self.metrics.store_errors_total.with_label_values(&[RELATIONAL]).inc();
        }
        result
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            primary: self.metrics.sink_writes("primary"),
            fallback: self.metrics.sink_writes("fallback"),
            dropped: self.metrics.sink_writes("dropped"),
        }
    }

    /// Check both stores. Degraded means exactly one is reachable.
    pub fn health(&self) -> SinkHealth {
        let (queue, queue_backlog) = match &self.primary {
            Some(q) => match q.ping().and_then(|_| q.backlog()) {
                Ok(n) => (true, Some(n)),
                Err(e) => {
                    warn!(error = %e, "queue health check failed");
                    (false, None)
                }
            },
            None => (false, None),
        };

        let relational = match &self.fallback {
            Some(t) => match t.ping() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "relational health check failed");
                    false
                }
            },
            None => false,
        };

        if let Some(n) = queue_backlog {
            self.metrics.queue_backlog.set(i64::try_from(n).unwrap_or(i64::MAX));
            if let Some(limit) = self.backlog_alert_threshold {
                if n >= limit {
                    warn!(backlog = n, threshold = limit, "anomaly queue backlog at or above threshold");
                }
            }
        }

        let status = match (queue, relational) {
            (true, true) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        SinkHealth {
            status,
            queue,
            relational,
            queue_backlog,
        }
    }

    /// Log the final write counts. Connections are released when the last
    /// reference to the sink is dropped.
    pub fn close(&self) -> SinkStats {
        let stats = self.stats();
        info!(primary = stats.primary, fallback = stats.fallback, dropped = stats.dropped, "sink closed");
        stats
    }
}

impl Drop for ResilientDualSink {
    fn drop(&mut self) {
        if let Some(q) = &self.primary {
            debug!(store = %q.describe(), "queue connection released");
        }
        if let Some(t) = &self.fallback {
            debug!(store = %t.describe(), "relational connection released");
        }
    }
}
