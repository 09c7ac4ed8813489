//! Comparison run endpoint
//!
//! POST /api/compare starts a run and holds the request open until it ends.
//! Progress is observable concurrently through GET /api/progress. Only one
//! run may be in flight; a second request gets 409.

use crate::error::{ApiError, ApiResult, RunError};
use crate::pipeline::Selectors;
use crate::types::RunSummary;
use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    /// Notion page URL or id; that source is skipped when absent
    #[serde(default)]
    pub page_id: Option<String>,
    /// ERP prompt-name filter; that source is skipped when absent
    #[serde(default)]
    pub prompt_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_url: Option<String>,
}

/// POST /api/compare
pub async fn start_comparison(
    State(state): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<Json<CompareResponse>> {
    let selectors = Selectors {
        erp_prompt_name: request.prompt_name,
        notion_page_url: request.page_id,
    };

    // Validate before touching run state so a bad request leaves the
    // tracker untouched
    if selectors.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one of page_id or prompt_name is required".to_string(),
        ));
    }

    let orchestrator = state.orchestrator.clone();
    let (run_id, token) = orchestrator
        .tracker()
        .begin_run()
        .await
        .map_err(|_| ApiError::Conflict("A comparison run is already in progress".to_string()))?;

    tracing::info!(%run_id, "Comparison run started");

    // Run on its own task so progress polls observe the run concurrently
    // even though this handler waits for the outcome
    let handle = tokio::spawn(async move { orchestrator.execute(selectors, token).await });
    let result = handle
        .await
        .map_err(|e| ApiError::Internal(format!("comparison task panicked: {}", e)))?;

    let response = match result {
        Ok(outcome) => CompareResponse {
            success: true,
            message: if outcome.degraded {
                "Comparison completed, but the report could not be written".to_string()
            } else {
                "Comparison completed".to_string()
            },
            summary: Some(outcome.summary),
            sheet_url: outcome.report_location,
        },
        Err(RunError::Cancelled { partial }) => CompareResponse {
            success: false,
            message: "Comparison cancelled".to_string(),
            summary: partial,
            sheet_url: None,
        },
        Err(e) => CompareResponse {
            success: false,
            message: e.to_string(),
            summary: None,
            sheet_url: None,
        },
    };

    Ok(Json(response))
}
