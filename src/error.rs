//! Error types
//!
//! Abort-class errors stop the pipeline at the current stage; the comparator
//! and report stages have their own absorb/degrade semantics and never raise
//! these (see `services::ModelError` and `services::ReportWriteError`).

use crate::services::SourceFetchError;
use crate::types::RunSummary;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline failure for a single run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    SourceFetch(#[from] SourceFetchError),

    /// Malformed source data (e.g. duplicate keys within one source)
    #[error("normalization failed: {0}")]
    Normalization(String),

    /// Both sources produced no records
    #[error("no data found from either source")]
    NoData,

    /// A stage exceeded its ceiling; prevents an unbounded hang from
    /// masquerading as a running job
    #[error("stage '{0}' exceeded its time ceiling")]
    StageTimeout(&'static str),

    /// Cooperative cancellation, not a fault. Carries whatever partial
    /// summary was computed before the cutoff.
    #[error("run cancelled")]
    Cancelled { partial: Option<RunSummary> },
}

/// HTTP-layer error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - a run is already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
