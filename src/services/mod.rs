//! External collaborator clients
//!
//! The pipeline depends on the traits defined here; the concrete wire clients
//! live in the submodules and integration tests substitute stubs.

pub mod erp_client;
pub mod model_client;
pub mod notion_client;
pub mod sheets_client;

pub use erp_client::ErpClient;
pub use model_client::ClaudeClient;
pub use notion_client::NotionClient;
pub use sheets_client::{CsvReportWriter, SheetsClient};

use crate::pipeline::report::ReportRow;
use crate::types::{ModelVerdict, RawRecord, SourceKind};
use async_trait::async_trait;
use thiserror::Error;

/// Fetch failure for either source. Aborts the run.
///
/// `Display`/`Error` are implemented by hand because thiserror would treat
/// the `source` field as the error's cause, and `SourceKind` is not an error.
#[derive(Debug, Clone)]
pub struct SourceFetchError {
    pub source: SourceKind,
    pub message: String,
}

impl std::fmt::Display for SourceFetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fetch failed: {}", self.source, self.message)
    }
}

impl std::error::Error for SourceFetchError {}

impl SourceFetchError {
    pub fn new(source: SourceKind, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Language-model service failure for a single pair. Absorbed per pair,
/// never aborts the run.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Timeout, rate limit, or 5xx; eligible for retry
    #[error("transient model service error: {0}")]
    Transient(String),
    /// Auth or request construction failure; retrying will not help
    #[error("model service error: {0}")]
    Fatal(String),
}

/// Report persistence failure. Degrades the run outcome without aborting it.
#[derive(Debug, Clone, Error)]
#[error("report write failed: {0}")]
pub struct ReportWriteError(pub String);

/// ERP record store: policy parameters selected by prompt name
#[async_trait]
pub trait ErpSource: Send + Sync {
    async fn fetch_by_prompt_name(&self, name: &str) -> Result<Vec<RawRecord>, SourceFetchError>;
}

/// Notion document source: policy pages under a database/page id
#[async_trait]
pub trait NotionSource: Send + Sync {
    async fn fetch_page_records(&self, page_id: &str) -> Result<Vec<RawRecord>, SourceFetchError>;
}

/// Language-model service rendering an equivalence verdict for one pair
#[async_trait]
pub trait VerdictModel: Send + Sync {
    async fn compare(&self, notion_text: &str, erp_text: &str) -> Result<ModelVerdict, ModelError>;
}

/// External report sink; returns a shareable URL (or path) on success
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write(&self, rows: &[ReportRow]) -> Result<String, ReportWriteError>;
}
