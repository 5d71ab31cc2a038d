use crate::detect::store::KeyedWindowStore;
use crate::detect::window::{WindowedHistory, DEFAULT_WINDOW_MS};
use crate::detect::{AnomalyKind, AnomalyRecord, Severity};
use crate::telemetry::{SignalValue, VehicleEvent, SPEED_SIGNAL};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Look-back of the short speed rule.
pub const SHORT_RANGE_MS: i64 = 1_000;
/// Look-back of the long speed rule.
pub const LONG_RANGE_MS: i64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    pub window_ms: i64,
    /// Maximum speed delta (m/s) tolerated within one second.
    pub speed_delta_1s: f64,
    /// Maximum speed delta (m/s) tolerated within two seconds.
    pub speed_delta_2s: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            speed_delta_1s: 18.0,
            speed_delta_2s: 24.0,
        }
    }
}

/// What the engine concluded about one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Anomaly(AnomalyRecord),
    /// Recognised signal, nothing abnormal.
    Clean,
    /// Recognised signal whose value could not be coerced.
    Malformed { signal: String },
    /// Signal the engine has no rule for.
    Ignored,
}

impl Verdict {
    pub fn into_anomaly(self) -> Option<AnomalyRecord> {
        match self {
            Verdict::Anomaly(rec) => Some(rec),
            _ => None,
        }
    }
}

struct SystemRule {
    signal: &'static str,
    kind: AnomalyKind,
    severity: Severity,
    description: &'static str,
    context: &'static str,
}

const SYSTEM_RULES: [SystemRule; 4] = [
    SystemRule {
        signal: "AEB",
        kind: AnomalyKind::AebTriggered,
        severity: Severity::High,
        description: "Autonomous Emergency Braking activated",
        context: "AEB system intervention detected",
    },
    SystemRule {
        signal: "NOA_EXIT",
        kind: AnomalyKind::NoaExit,
        severity: Severity::Medium,
        description: "Navigate on Autopilot exited",
        context: "NOA system disengaged",
    },
    SystemRule {
        signal: "ACC_EXIT",
        kind: AnomalyKind::AccExit,
        severity: Severity::Medium,
        description: "Adaptive Cruise Control exited",
        context: "ACC system disengaged",
    },
    SystemRule {
        signal: "LKA_EXIT",
        kind: AnomalyKind::LkaExit,
        severity: Severity::Medium,
        description: "Lane Keeping Assist exited",
        context: "LKA system disengaged",
    },
];

/// Evaluates speed and driver-assist rules, one event at a time per vehicle.
///
/// Callers must not process two events of the same vin concurrently; events
/// of different vins may be processed in parallel.
pub struct AnomalyRuleEngine {
    thresholds: DetectionThresholds,
    store: Arc<KeyedWindowStore>,
}

impl AnomalyRuleEngine {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        let store = Arc::new(KeyedWindowStore::new(thresholds.window_ms));
        Self { thresholds, store }
    }

    pub fn with_store(thresholds: DetectionThresholds, store: Arc<KeyedWindowStore>) -> Self {
        Self { thresholds, store }
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    pub fn store(&self) -> &Arc<KeyedWindowStore> {
        &self.store
    }

    /// Process one event, updating the vin's speed history when applicable.
    pub fn process(&self, event: &VehicleEvent) -> Option<AnomalyRecord> {
        self.inspect(event).into_anomaly()
    }

    /// Like [`process`](Self::process) but also reports why no record was
    /// produced.
    pub fn inspect(&self, event: &VehicleEvent) -> Verdict {
        if event.signal.name == SPEED_SIGNAL {
            let Some(speed) = event.signal.as_f64() else {
                warn!(vin = %event.vin, value = ?event.signal.value, "speed value is not numeric, skipping");
                return Verdict::Malformed { signal: event.signal.name.clone() };
            };
            // Rules see the history as it was before this sample.
            let verdict = self.store.with_history(&event.vin, |history| {
                let verdict = self.check_speed(event, history, speed);
                history.add_sample(event.event_ts, speed);
                verdict
            });
            log_verdict(event, &verdict);
            return verdict;
        }

        let verdict = self.check_system_signal(event);
        log_verdict(event, &verdict);
        verdict
    }

    /// Evaluate `event` against `history` without touching the store.
    pub fn evaluate(&self, event: &VehicleEvent, history: &WindowedHistory) -> Verdict {
        if event.signal.name == SPEED_SIGNAL {
            return match event.signal.as_f64() {
                Some(speed) => self.check_speed(event, history, speed),
                None => Verdict::Malformed { signal: event.signal.name.clone() },
            };
        }
        self.check_system_signal(event)
    }

    fn check_speed(&self, event: &VehicleEvent, history: &WindowedHistory, speed: f64) -> Verdict {
        let t = event.event_ts;
        let rules = [
            (SHORT_RANGE_MS, self.thresholds.speed_delta_1s, AnomalyKind::SpeedChange1s, Severity::High, "1 second"),
            (LONG_RANGE_MS, self.thresholds.speed_delta_2s, AnomalyKind::SpeedChange2s, Severity::Medium, "2 seconds"),
        ];

        for (range_ms, threshold, kind, severity, span) in rules {
            let hit = history
                .samples_in_range(t, range_ms)
                .map(|s| (s, (speed - s.speed).abs()))
                .find(|(_, delta)| *delta > threshold);

            if let Some((prev, delta)) = hit {
                let elapsed = t - prev.timestamp;
                return Verdict::Anomaly(AnomalyRecord {
                    vin: event.vin.clone(),
                    ingestion_ts: event.ingestion_ts,
                    event_ts: event.event_ts,
                    kind,
                    severity,
                    description: format!(
                        "Speed changed too rapidly within {}: {:.2} m/s -> {:.2} m/s in {} ms",
                        span, prev.speed, speed, elapsed
                    ),
                    signal_name: event.signal.name.clone(),
                    current_value: SignalValue::Number(delta),
                    threshold_value: SignalValue::Number(threshold),
                    context: format!(
                        "Previous speed: {:.2} m/s, Current speed: {:.2} m/s, Time diff: {} ms",
                        prev.speed, speed, elapsed
                    ),
                });
            }
        }
        Verdict::Clean
    }

    fn check_system_signal(&self, event: &VehicleEvent) -> Verdict {
        let Some(rule) = SYSTEM_RULES.iter().find(|r| r.signal == event.signal.name) else {
            return Verdict::Ignored;
        };
        let (Some(raw), Some(active)) = (event.signal.value.as_ref(), event.signal.as_bool()) else {
            return Verdict::Malformed { signal: event.signal.name.clone() };
        };
        if !active {
            return Verdict::Clean;
        }

        Verdict::Anomaly(AnomalyRecord {
            vin: event.vin.clone(),
            ingestion_ts: event.ingestion_ts,
            event_ts: event.event_ts,
            kind: rule.kind,
            severity: rule.severity,
            description: rule.description.to_string(),
            signal_name: event.signal.name.clone(),
            current_value: raw.clone(),
            threshold_value: SignalValue::Bool(true),
            context: rule.context.to_string(),
        })
    }
}

fn log_verdict(event: &VehicleEvent, verdict: &Verdict) {
    match verdict {
        Verdict::Anomaly(rec) => info!(
            vin = %rec.vin,
            kind = %rec.kind,
            severity = %rec.severity,
            current = %rec.current_value,
            "anomaly detected"
        ),
        Verdict::Malformed { signal } => {
            warn!(vin = %event.vin, %signal, value = ?event.signal.value, "signal value could not be coerced")
        }
        Verdict::Clean | Verdict::Ignored => {
            debug!(vin = %event.vin, signal = %event.signal.name, ts = event.event_ts, "event processed")
        }
    }
}
