//! Streaming driver: JSON-lines in, anomalies out.
//!
//! Events are routed to a fixed set of workers by a hash of the vin, so all
//! events of one vehicle are handled in order by the same worker while
//! different vehicles proceed in parallel.

pub mod checkpoint;

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::detect::engine::Verdict;
use crate::detect::AnomalyRuleEngine;
use crate::metrics::Metrics;
use crate::sink::ResilientDualSink;
use crate::telemetry::{decode_event, VehicleEvent};

pub use crate::metrics::StatsSnapshot;

/// Worker index for `vin`. Stable for the life of the process.
pub fn partition_for(vin: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    vin.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

pub struct Pipeline {
    engine: Arc<AnomalyRuleEngine>,
    sink: Arc<ResilientDualSink>,
    metrics: Arc<Metrics>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Counters are recorded in the sink's metrics registry.
    pub fn new(engine: Arc<AnomalyRuleEngine>, sink: Arc<ResilientDualSink>, config: PipelineConfig) -> Self {
        let metrics = sink.metrics().clone();
        Self {
            engine,
            sink,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Restore window state from the configured checkpoint, if any.
    pub fn restore_checkpoint(&self) -> Result<Option<usize>> {
        match &self.config.checkpoint_path {
            Some(path) => checkpoint::load(self.engine.store(), path),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self) {
        let Some(path) = self.config.checkpoint_path.clone() else {
            return;
        };
        let store = self.engine.store().clone();
        let written = tokio::task::spawn_blocking(move || {
            checkpoint::save(&store, &path).map_err(|e| (path, e))
        })
        .await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err((path, e))) => {
                error!(path = %path.display(), error = %format!("{:#}", e), "failed to write window checkpoint")
            }
            Err(e) => error!(error = %e, "checkpoint task failed"),
        }
    }

    /// Consume `input` until end of stream or until `shutdown` resolves,
    /// then drain in-flight events and write a final checkpoint.
    pub async fn run<R, F>(&self, input: R, shutdown: F) -> Result<StatsSnapshot>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let workers = self.config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                id,
                rx,
                self.engine.clone(),
                self.sink.clone(),
                self.metrics.clone(),
            )));
        }
        info!(workers, capacity = self.config.channel_capacity, "pipeline started");

        let period = Duration::from_millis(self.config.checkpoint_interval_ms.max(1));
        let mut checkpoint_timer = interval_at(Instant::now() + period, period);
        let checkpointing = self.config.checkpoint_path.is_some();

        let mut lines = input.lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, draining workers");
                    break;
                }
                _ = checkpoint_timer.tick(), if checkpointing => {
                    self.save_checkpoint().await;
                }
                next = lines.next_line() => {
                    let line = match next {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            info!("input exhausted");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "failed to read input, stopping");
                            break;
                        }
                    };
                    self.metrics.lines_total.inc();
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = match decode_event(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            self.metrics.decode_errors_total.inc();
                            warn!(line = self.metrics.lines_total.get(), error = %e, "skipping undecodable event");
                            continue;
                        }
                    };
                    let slot = partition_for(&event.vin, workers);
                    // A full channel must not hold off shutdown.
                    tokio::select! {
                        sent = senders[slot].send(event) => {
                            if sent.is_err() {
                                error!(worker = slot, "worker stopped unexpectedly");
                                break;
                            }
                        }
                        _ = &mut shutdown => {
                            info!("shutdown requested while workers were busy, draining");
                            break;
                        }
                    }
                }
            }
        }

        drop(senders);
        for (id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = id, error = %e, "worker task failed");
            }
        }
        self.save_checkpoint().await;

        let summary = self.metrics.snapshot();
        info!(
            lines = summary.lines,
            events = summary.events,
            anomalies = summary.anomalies,
            decode_errors = summary.decode_errors,
            malformed = summary.malformed,
            primary = summary.persisted_primary,
            fallback = summary.persisted_fallback,
            dropped = summary.dropped,
            "pipeline finished"
        );
        Ok(summary)
    }
}

async fn worker_loop(
    id: usize,
    mut rx: mpsc::Receiver<VehicleEvent>,
    engine: Arc<AnomalyRuleEngine>,
    sink: Arc<ResilientDualSink>,
    metrics: Arc<Metrics>,
) {
    debug!(worker = id, "worker started");
    while let Some(event) = rx.recv().await {
        match engine.inspect(&event) {
            Verdict::Anomaly(record) => {
                metrics.events_total.with_label_values(&["anomaly"]).inc();
                metrics
                    .anomalies_total
                    .with_label_values(&[record.kind.as_str(), record.severity.as_str()])
                    .inc();
                let sink = sink.clone();
                // Store writes block; wait for them so per-vin order holds.
                if let Err(e) = tokio::task::spawn_blocking(move || sink.write(&record)).await {
                    metrics.sink_writes_total.with_label_values(&["dropped"]).inc();
                    error!(worker = id, error = %e, "sink write task failed");
                }
            }
            Verdict::Malformed { .. } => {
                metrics.events_total.with_label_values(&["malformed"]).inc();
            }
            Verdict::Clean => {
                metrics.events_total.with_label_values(&["clean"]).inc();
            }
            Verdict::Ignored => {
                metrics.events_total.with_label_values(&["ignored"]).inc();
            }
        }
    }
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionThresholds;
    use crate::sink::{RowStore, SinkError};
    use crate::storage::AnomalyRow;
    use crate::telemetry::Signal;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    /// Fallback store that takes a while per insert.
    struct SlowTable(Duration);

    impl RowStore for SlowTable {
        fn insert(&self, _row: &AnomalyRow) -> Result<(), SinkError> {
            std::thread::sleep(self.0);
            Ok(())
        }
        fn ping(&self) -> Result<(), SinkError> {
            Ok(())
        }
        fn describe(&self) -> String {
            "slow table".into()
        }
    }

    fn line(vin: &str, ts: i64, signal: Signal) -> String {
        serde_json::to_string(&VehicleEvent::new(vin, ts + 5, ts, signal)).unwrap()
    }

    fn pipeline(workers: usize) -> Pipeline {
        Pipeline::new(
            Arc::new(AnomalyRuleEngine::new(DetectionThresholds::default())),
            Arc::new(ResilientDualSink::new(None, None, metrics())),
            PipelineConfig {
                workers,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_partition_is_stable_and_bounded() {
        for vin in ["A", "VIN-2", "1HGCM82633A123456"] {
            let p = partition_for(vin, 7);
            assert!(p < 7);
            assert_eq!(p, partition_for(vin, 7));
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[tokio::test]
    async fn test_counts_lines_and_anomalies() {
        let input = [
            line("V1", 1_000, Signal::new("speed", 10.0)),
            line("V1", 1_500, Signal::new("speed", 30.0)),
            line("V2", 1_000, Signal::new("AEB", true)),
            line("V2", 1_100, Signal::new("speed", "fast")),
            "not json".to_string(),
            String::new(),
            line("V3", 1_000, Signal::new("gear", "D")),
        ]
        .join("\n");

        let p = pipeline(3);
        let summary = p
            .run(input.as_bytes(), std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(summary.lines, 7);
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.events, 5);
        assert_eq!(summary.anomalies, 2);
        assert_eq!(summary.malformed, 1);
        // No store is connected in this test.
        assert_eq!(summary.dropped, 2);
        assert_eq!(p.metrics().snapshot(), summary);
    }

    #[tokio::test]
    async fn test_shutdown_stops_reading() {
        let p = pipeline(2);
        let (_tx, rx) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(rx);
        let summary = p.run(reader, async {}).await.unwrap();
        assert_eq!(summary.lines, 0);
    }

    #[tokio::test]
    async fn test_final_checkpoint_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windows.json");
        let p = Pipeline::new(
            Arc::new(AnomalyRuleEngine::new(DetectionThresholds::default())),
            Arc::new(ResilientDualSink::new(None, None, metrics())),
            PipelineConfig {
                workers: 2,
                checkpoint_path: Some(path.clone()),
                ..Default::default()
            },
        );
        assert_eq!(p.restore_checkpoint().unwrap(), None);

        let input = line("V1", 1_000, Signal::new("speed", 10.0));
        p.run(input.as_bytes(), std::future::pending::<()>()).await.unwrap();
        assert!(path.exists());

        let store = crate::detect::KeyedWindowStore::new(30_000);
        assert_eq!(checkpoint::load(&store, &path).unwrap(), Some(1));
        assert_eq!(store.get("V1").len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_not_blocked_by_full_channel() {
        let sink = ResilientDualSink::new(None, Some(Box::new(SlowTable(Duration::from_millis(200)))), metrics());
        let p = Pipeline::new(
            Arc::new(AnomalyRuleEngine::new(DetectionThresholds::default())),
            Arc::new(sink),
            PipelineConfig {
                workers: 1,
                channel_capacity: 1,
                ..Default::default()
            },
        );
        let input = (0..40)
            .map(|i| line("V1", 1_000 + i * 100, Signal::new("AEB", true)))
            .collect::<Vec<_>>()
            .join("\n");

        let started = std::time::Instant::now();
        let summary = p
            .run(input.as_bytes(), tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
        assert!(summary.lines < 40);
        assert_eq!(summary.persisted_fallback, summary.anomalies);
    }

    #[tokio::test]
    async fn test_periodic_checkpoint_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windows.json");
        let p = Pipeline::new(
            Arc::new(AnomalyRuleEngine::new(DetectionThresholds::default())),
            Arc::new(ResilientDualSink::new(None, None, metrics())),
            PipelineConfig {
                workers: 1,
                checkpoint_path: Some(path.clone()),
                checkpoint_interval_ms: 20,
                ..Default::default()
            },
        );

        // Input stays open, so only the timer can produce the file.
        let (_tx, rx) = tokio::io::duplex(64);
        let watched = path.clone();
        let appeared = async move {
            while !watched.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let run = p.run(tokio::io::BufReader::new(rx), appeared);
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("periodic checkpoint never written")
            .unwrap();
        assert!(path.exists());
    }
}
