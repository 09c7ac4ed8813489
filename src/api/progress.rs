//! Progress polling and cancellation endpoints

use crate::progress::{LogSeverity, RunStatus};
use crate::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProgressLogEntry {
    pub message: String,
    /// "info", "warning" or "error"
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub status: RunStatus,
    pub progress_percentage: u8,
    pub logs: Vec<ProgressLogEntry>,
}

/// GET /api/progress
pub async fn get_progress(State(state): State<AppState>) -> Json<ProgressResponse> {
    let snapshot = state.orchestrator.tracker().snapshot().await;

    let logs = snapshot
        .logs
        .into_iter()
        .map(|entry| ProgressLogEntry {
            message: entry.message,
            kind: match entry.severity {
                LogSeverity::Info => "info",
                LogSeverity::Warning => "warning",
                LogSeverity::Error => "error",
            },
            timestamp: entry.timestamp,
        })
        .collect();

    Json(ProgressResponse {
        status: snapshot.status,
        progress_percentage: snapshot.percentage,
        logs,
    })
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/stop
///
/// Cooperative: the run stops at its next stage boundary. Idempotent, and a
/// no-op when no run is active.
pub async fn stop_comparison(State(state): State<AppState>) -> Json<StopResponse> {
    let was_running = state.orchestrator.tracker().request_cancel().await;

    Json(StopResponse {
        success: true,
        message: if was_running {
            "Cancellation requested; the run will stop at the next stage boundary".to_string()
        } else {
            "No comparison run in progress".to_string()
        },
    })
}
