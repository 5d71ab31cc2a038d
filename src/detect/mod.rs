//! Keyed, time-windowed anomaly detection.

pub mod engine;
pub mod store;
pub mod window;

pub use engine::{AnomalyRuleEngine, DetectionThresholds};
pub use store::{KeyedWindowStore, WindowSnapshot};
pub use window::{SpeedSample, WindowedHistory};

use crate::telemetry::SignalValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported window snapshot version {found} (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },
}

/// Kinds of anomaly the rule engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    #[serde(rename = "SPEED_CHANGE_1S")]
    SpeedChange1s,
    #[serde(rename = "SPEED_CHANGE_2S")]
    SpeedChange2s,
    #[serde(rename = "AEB_TRIGGERED")]
    AebTriggered,
    #[serde(rename = "NOA_EXIT")]
    NoaExit,
    #[serde(rename = "ACC_EXIT")]
    AccExit,
    #[serde(rename = "LKA_EXIT")]
    LkaExit,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::SpeedChange1s => "SPEED_CHANGE_1S",
            AnomalyKind::SpeedChange2s => "SPEED_CHANGE_2S",
            AnomalyKind::AebTriggered => "AEB_TRIGGERED",
            AnomalyKind::NoaExit => "NOA_EXIT",
            AnomalyKind::AccExit => "ACC_EXIT",
            AnomalyKind::LkaExit => "LKA_EXIT",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected anomaly, ready for the sink.
///
/// Serialized field names match what downstream queue consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub vin: String,
    #[serde(rename = "kafkaTimestamp")]
    pub ingestion_ts: i64,
    #[serde(rename = "sigTimestamp")]
    pub event_ts: i64,
    #[serde(rename = "anomalyType")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    #[serde(rename = "sigName")]
    pub signal_name: String,
    /// Speed delta for speed rules, the raw signal value otherwise.
    #[serde(rename = "currentValue")]
    pub current_value: SignalValue,
    #[serde(rename = "thresholdValue")]
    pub threshold_value: SignalValue,
    #[serde(rename = "additionalInfo")]
    pub context: String,
}
