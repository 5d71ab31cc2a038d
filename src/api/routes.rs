//! API route definitions.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use super::state::AppState;
use crate::sink::HealthStatus;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    // Store health checks do blocking I/O.
    let sink = state.sink.clone();
    let health = match tokio::task::spawn_blocking(move || sink.health()).await {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "health check task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "message": "health check failed" } })),
            );
        }
    };

    let code = match health.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    (
        code,
        Json(json!({
            "data": health,
            "meta": {
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION")
            }
        })),
    )
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "pipeline": state.metrics.snapshot(),
            "sink": state.sink.stats(),
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Prometheus text exposition of every registered collector.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "failed to export metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}
