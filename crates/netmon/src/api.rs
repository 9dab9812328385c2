//! HTTP API: telemetry ingest, read endpoints, health checks and
//! Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use netmon_lib::alerts::AlertEngine;
use netmon_lib::health::{ComponentStatus, HealthRegistry};
use netmon_lib::models::TelemetryRecord;
use netmon_lib::pipeline::{PipelineEngine, PipelineError};
use netmon_lib::storage::HybridStorage;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Name of the pipeline ingest submits to
pub const TELEMETRY_PIPELINE: &str = "telemetry";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine: Arc<PipelineEngine>,
    pub storage: Arc<HybridStorage>,
    pub alerts: Arc<AlertEngine>,
}

/// Accept one telemetry record for processing.
///
/// 202 means queued, not processed; a saturated queue answers 429 so
/// collectors back off instead of piling up.
async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(record): Json<TelemetryRecord>,
) -> impl IntoResponse {
    match state.engine.submit(TELEMETRY_PIPELINE, record) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(PipelineError::Saturated) => StatusCode::TOO_MANY_REQUESTS,
        Err(PipelineError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        Err(e) => {
            error!(error = %e, "Ingest failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    #[serde(default = "default_summary_hours")]
    hours: i64,
}

fn default_summary_hours() -> i64 {
    24
}

/// Traffic summary for one device over a recent window
async fn device_summary(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<i64>,
    Query(params): Query<SummaryParams>,
) -> impl IntoResponse {
    match state
        .storage
        .summary(device_id, chrono::Duration::hours(params.hours))
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            error!(device_id, error = %e, "Summary query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatisticsParams {
    #[serde(default = "default_statistics_days")]
    days: i64,
}

fn default_statistics_days() -> i64 {
    7
}

/// Alert statistics over a recent window
async fn alert_statistics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatisticsParams>,
) -> impl IntoResponse {
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(params.days);
    match state.alerts.statistics(start, end).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            error!(error = %e, "Alert statistics query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Health check - 200 while operational, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check - 200 once initialized and healthy
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/telemetry", post(ingest))
        .route("/devices/:device_id/summary", get(device_summary))
        .route("/alerts/statistics", get(alert_statistics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
