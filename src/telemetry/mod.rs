//! Inbound vehicle telemetry: events, signals, and value coercion.

pub mod simulate;

use serde::{Deserialize, Serialize};

/// Signal name carrying vehicle speed in m/s.
pub const SPEED_SIGNAL: &str = "speed";

/// A single telemetry event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleEvent {
    /// Vehicle identifier; partitions all per-entity state.
    pub vin: String,
    /// Arrival time assigned by the transport (ms since epoch).
    #[serde(rename = "kafkaTimestamp")]
    pub ingestion_ts: i64,
    /// Time the signal was sampled on the vehicle (ms since epoch).
    #[serde(rename = "sigTimestamp")]
    pub event_ts: i64,
    #[serde(rename = "sig")]
    pub signal: Signal,
}

impl VehicleEvent {
    pub fn new(vin: impl Into<String>, ingestion_ts: i64, event_ts: i64, signal: Signal) -> Self {
        Self {
            vin: vin.into(),
            ingestion_ts,
            event_ts,
            signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "sigName")]
    pub name: String,
    /// Missing or `null` values are kept as `None` and never raise anomalies.
    #[serde(default)]
    pub value: Option<SignalValue>,
}

impl Signal {
    pub fn new(name: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(SignalValue::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(SignalValue::as_bool)
    }
}

/// Dynamically typed signal payload.
///
/// Variant order matters for untagged decoding: JSON booleans must not be
/// captured by the numeric arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SignalValue {
    /// Numeric view. Only finite numbers are accepted; booleans never coerce.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            SignalValue::Number(n) => *n,
            SignalValue::Text(s) => s.trim().parse::<f64>().ok()?,
            SignalValue::Bool(_) => return None,
        };
        v.is_finite().then_some(v)
    }

    /// Boolean view: numbers are true when nonzero, text accepts
    /// `true`/`false` in any case.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(b) => Some(*b),
            SignalValue::Number(n) if n.is_nan() => None,
            SignalValue::Number(n) => Some(*n != 0.0),
            SignalValue::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    /// Textual form used when the value has to land in a text column.
    pub fn to_text(&self) -> String {
        match self {
            SignalValue::Bool(b) => b.to_string(),
            SignalValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{:.1}", n)
            }
            SignalValue::Number(n) => n.to_string(),
            SignalValue::Text(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for SignalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Number(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::Text(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        SignalValue::Text(v)
    }
}

/// Decode one line-delimited JSON event.
pub fn decode_event(line: &str) -> serde_json::Result<VehicleEvent> {
    serde_json::from_str(line)
}
