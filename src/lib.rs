//! policy-parity - ERP / Notion conditional-policy equivalence checker
//!
//! Fetches conditional policy definitions from an ERP backend and from
//! Notion documentation pages, normalizes both into one canonical shape,
//! pairs them by parameter name, asks a language model whether each pair is
//! semantically equivalent, and publishes the results as a shareable report.
//! A small HTTP API starts runs and exposes their progress.

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod types;

use crate::config::Settings;
use crate::pipeline::Orchestrator;
use crate::progress::ProgressTracker;
use crate::services::{
    ClaudeClient, CsvReportWriter, ErpClient, NotionClient, ReportWriter, SheetsClient,
};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            startup_time: Utc::now(),
        }
    }

    /// Wire the real clients from settings. The report writer is Google
    /// Sheets when a token is configured, a local CSV file otherwise.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let erp = Arc::new(ErpClient::new(settings.erp.clone())?);
        let notion = Arc::new(NotionClient::new(settings.notion.clone())?);
        let model = Arc::new(ClaudeClient::new(settings.model.clone())?);

        let writer: Arc<dyn ReportWriter> = match &settings.sheets.access_token {
            Some(token) => Arc::new(SheetsClient::new(settings.sheets.clone(), token.clone())?),
            None => Arc::new(CsvReportWriter::new(settings.sheets.fallback_dir.clone())),
        };

        let orchestrator = Orchestrator::new(
            erp,
            notion,
            model,
            writer,
            settings.run.clone(),
            ProgressTracker::new(),
        );

        Ok(Self::new(Arc::new(orchestrator)))
    }
}

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/compare", post(api::compare::start_comparison))
        .route("/api/progress", get(api::progress::get_progress))
        .route("/api/stop", post(api::progress::stop_comparison))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
