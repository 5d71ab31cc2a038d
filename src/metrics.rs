//! Prometheus metrics for the pipeline and the anomaly sink.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

const STORE_LATENCY_BUCKETS: [f64; 9] = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5];

/// Collectors shared by the pipeline, the sink and the HTTP surface.
pub struct Metrics {
    registry: Registry,

    /// Input lines read, including blank and undecodable ones
    pub lines_total: IntCounter,

    /// Lines that did not decode into an event
    pub decode_errors_total: IntCounter,

    /// Decoded events by rule verdict
    pub events_total: IntCounterVec,

    /// Detected anomalies by kind and severity
    pub anomalies_total: IntCounterVec,

    /// Sink write outcomes (primary, fallback, dropped)
    pub sink_writes_total: IntCounterVec,

    /// Failed writes per store
    pub store_errors_total: IntCounterVec,

    /// Write latency per store
    pub store_write_seconds: HistogramVec,

    /// Last observed length of the primary queue
    pub queue_backlog: IntGauge,
}

/// Plain counter values, as reported by `/api/v1/stats` and the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub decode_errors: u64,
    pub events: u64,
    pub anomalies: u64,
    pub malformed: u64,
    pub persisted_primary: u64,
    pub persisted_fallback: u64,
    pub dropped: u64,
}

pub const VERDICTS: [&str; 4] = ["anomaly", "clean", "malformed", "ignored"];

impl Metrics {
    /// Create all collectors and register them with a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let lines_total = IntCounter::new("vehguard_input_lines_total", "Input lines read")?;
        registry.register(Box::new(lines_total.clone()))?;

        let decode_errors_total = IntCounter::new(
            "vehguard_decode_errors_total",
            "Input lines that could not be decoded into an event",
        )?;
        registry.register(Box::new(decode_errors_total.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("vehguard_events_total", "Events evaluated, by rule verdict"),
            &["verdict"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let anomalies_total = IntCounterVec::new(
            Opts::new("vehguard_anomalies_total", "Anomalies detected"),
            &["kind", "severity"],
        )?;
        registry.register(Box::new(anomalies_total.clone()))?;

        let sink_writes_total = IntCounterVec::new(
            Opts::new("vehguard_sink_writes_total", "Anomaly writes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sink_writes_total.clone()))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new("vehguard_store_errors_total", "Failed anomaly writes per store"),
            &["store"],
        )?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let store_write_seconds = HistogramVec::new(
            HistogramOpts::new("vehguard_store_write_seconds", "Anomaly write latency per store")
                .buckets(STORE_LATENCY_BUCKETS.to_vec()),
            &["store"],
        )?;
        registry.register(Box::new(store_write_seconds.clone()))?;

        let queue_backlog = IntGauge::new(
            "vehguard_queue_backlog",
            "Records waiting in the primary anomaly queue at the last health check",
        )?;
        registry.register(Box::new(queue_backlog.clone()))?;

        Ok(Self {
            registry,
            lines_total,
            decode_errors_total,
            events_total,
            anomalies_total,
            sink_writes_total,
            store_errors_total,
            store_write_seconds,
            queue_backlog,
        })
    }

    pub fn events(&self, verdict: &str) -> u64 {
        self.events_total.with_label_values(&[verdict]).get()
    }

    pub fn sink_writes(&self, outcome: &str) -> u64 {
        self.sink_writes_total.with_label_values(&[outcome]).get()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines_total.get(),
            decode_errors: self.decode_errors_total.get(),
            events: VERDICTS.iter().map(|v| self.events(v)).sum(),
            anomalies: self.events("anomaly"),
            malformed: self.events("malformed"),
            persisted_primary: self.sink_writes("primary"),
            persisted_fallback: self.sink_writes("fallback"),
            dropped: self.sink_writes("dropped"),
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics output is not UTF-8")
    }
}
