//! Error types
//!
//! Startup failures ([`ResolveError`], [`LoadError`]) are fatal and travel out of
//! `main`. Per-job failures ([`GenerationError`]) are rendered into the job's
//! error envelope and never leave the handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;

/// Snapshot resolution failures. Any of these aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("MODEL_ID '{model_id}' is not in 'org/name' format")]
    InvalidIdentifier { model_id: String },

    #[error("snapshots directory not found: {}", path.display())]
    CacheNotFound { path: PathBuf },

    #[error("no snapshot subdirectories found under {}", path.display())]
    NoSnapshotsAvailable { path: PathBuf },
}

/// Failures while materializing the model from a resolved snapshot
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {}: {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },

    #[error("unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("no safetensors weights found in {}", .0.display())]
    MissingWeights(PathBuf),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("model download failed: {0}")]
    Download(String),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Request-scoped failures, reported to the caller as `{"status": "error"}`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Failed(String),

    #[error("generation returned no results")]
    Empty,
}

impl From<candle_core::Error> for GenerationError {
    fn from(err: candle_core::Error) -> Self {
        GenerationError::Failed(err.to_string())
    }
}

/// Errors surfaced by the local test API
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_messages_name_the_path() {
        let err = ResolveError::CacheNotFound {
            path: PathBuf::from("/cache/models--a--b/snapshots"),
        };
        assert!(err.to_string().contains("/cache/models--a--b/snapshots"));

        let err = ResolveError::InvalidIdentifier {
            model_id: "no-slash".to_string(),
        };
        assert!(err.to_string().contains("no-slash"));
    }

    #[test]
    fn test_generation_error_failed_is_bare_message() {
        let err = GenerationError::Failed("CUDA out of memory".to_string());
        assert_eq!(err.to_string(), "CUDA out of memory");
    }

    #[test]
    fn test_bad_request_status() {
        let response = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
