//! API request and response models

use crate::handler::GenerationResponse;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_id: String,
    pub snapshot_path: PathBuf,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Body of `POST /runsync`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Completed job, `status` is always `COMPLETED` because handler errors live
/// inside `output`
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub id: String,
    pub status: String,
    pub output: GenerationResponse,
}
