use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::layout::Identity;
use crate::log_event::LogEvent;
use axum::{
    extract::Extension,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    status: &'static str,
    identity: Identity,
    pending: usize,
    /// Number of records moved to the batch file by this request, if any.
    exported: Option<usize>,
    received_at: DateTime<Utc>,
}

/// Build the router exposing ingestion, status and health endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/batch", post(ingest_event))
        .route("/v1/events", post(ingest_event))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

async fn ingest_event(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<LogEvent>,
) -> Result<Json<IngestResponse>, AppError> {
    let received_at = Utc::now();
    let pipeline = state.pipeline.clone();
    let receipt = tokio::task::spawn_blocking(move || pipeline.ingest(&event))
        .await
        .map_err(|e| AppError::internal(format!("ingest task failed: {e}")))??;

    Ok(Json(IngestResponse {
        status: "accepted",
        identity: receipt.identity,
        pending: receipt.pending,
        exported: receipt.exported.map(|report| report.exported),
        received_at,
    }))
}

async fn status(Extension(state): Extension<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let pipeline = state.pipeline.clone();
    let status = tokio::task::spawn_blocking(move || pipeline.status())
        .await
        .map_err(|e| AppError::internal(format!("status task failed: {e}")))??;
    Ok(Json(serde_json::json!({
        "accumulator": status,
        "uptimeSeconds": state.uptime_seconds(),
    })))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
