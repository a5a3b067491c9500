//! API request handlers

use super::models::{HealthResponse, RunRequest, RunResponse};
use super::routes::AppState;
use crate::error::ApiError;
use crate::handler::Job;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

/// GET /health - Worker health check
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            model_id: state.context.model_id.to_string(),
            snapshot_path: state.context.snapshot_path.clone(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// POST /runsync - Run one job and wait for its result
pub async fn run_sync(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let id = req
        .id
        .unwrap_or_else(|| format!("test-{}", uuid::Uuid::new_v4()));
    let job = Job {
        id: Some(id.clone()),
        input: req.input,
    };

    let output = state.context.handler.handle(&job).await;

    Ok(Json(RunResponse {
        id,
        status: "COMPLETED".to_string(),
        output,
    }))
}
