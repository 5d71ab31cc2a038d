//! vehguard -- real-time anomaly detection over connected-vehicle telemetry.
//!
//! This crate provides the per-vehicle windowed speed history, the anomaly
//! rule engine, the queue-first/relational-fallback anomaly sink, and the
//! streaming pipeline that ties them together.

pub mod api;
pub mod config;
pub mod detect;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod telemetry;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;

use crate::config::VehguardConfig;
use crate::detect::AnomalyRuleEngine;
use crate::metrics::Metrics;
use crate::pipeline::{Pipeline, StatsSnapshot};
use crate::sink::ResilientDualSink;

/// Run the detector over `input` (stdin when `None`) until end of stream or
/// Ctrl-C, serving the health API alongside when configured.
pub async fn run(config: VehguardConfig, input: Option<&Path>) -> Result<StatsSnapshot> {
    // 1. Connect stores
    let metrics = Arc::new(Metrics::new()?);
    let store_cfg = config.clone();
    let sink_metrics = metrics.clone();
    let sink = tokio::task::spawn_blocking(move || ResilientDualSink::connect(&store_cfg, sink_metrics))
        .await?;
    let sink = Arc::new(sink);

    // 2. Detection state
    let engine = Arc::new(AnomalyRuleEngine::new(config.detection.thresholds()));
    let pipeline = Pipeline::new(engine, sink.clone(), config.pipeline.clone());
    if let Err(e) = pipeline.restore_checkpoint() {
        tracing::warn!(error = %format!("{:#}", e), "checkpoint not restored, starting with empty windows");
    }

    // 3. API server (background task)
    let api_task = config.api.bind.clone().map(|bind| {
        let state = api::state::AppState {
            sink: sink.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = api::serve(&bind, state).await {
                tracing::error!(%bind, error = %format!("{:#}", e), "API server stopped");
            }
        })
    });

    // 4. Stream
    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            pipeline.run(BufReader::new(file), shutdown_signal()).await?
        }
        None => pipeline.run(BufReader::new(tokio::io::stdin()), shutdown_signal()).await?,
    };

    // 5. Release stores
    if let Some(task) = api_task {
        task.abort();
        let _ = task.await;
    }
    drop(pipeline);
    sink.close();

    Ok(summary)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
