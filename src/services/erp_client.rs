//! ERP backend client
//!
//! Fetches GPT prompt parameter records in two steps: a paged id listing
//! filtered by prompt name, then one detail request per id. Detail requests
//! retry transient 5xx failures with exponential backoff; auth failures
//! abort the whole fetch immediately.

use crate::config::ErpSettings;
use crate::services::{ErpSource, SourceFetchError};
use crate::types::{RawRecord, SourceKind};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

const DETAIL_MAX_ATTEMPTS: u32 = 3;
const DETAIL_BASE_DELAY: Duration = Duration::from_secs(1);
/// Concurrent detail fetches; the ERP backend is slow but fragile
const DETAIL_CONCURRENCY: usize = 5;

const LIST_PAGE_CODE: &str = "chatai__input_parameters_for_prompts";
const DETAIL_PAGE_CODE: &str = "chatai__input_parameters_for_prompts_add_edit";

/// Per-record fetch failure classification
enum DetailError {
    /// 401/403: the auth token is expired or wrong; no point continuing
    Auth(String),
    /// Exhausted retries or a non-retryable response; record is skipped
    Skippable(String),
}

pub struct ErpClient {
    http: reqwest::Client,
    settings: ErpSettings,
}

impl ErpClient {
    pub fn new(settings: ErpSettings) -> Result<Self, SourceFetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceFetchError::new(SourceKind::Erp, e.to_string()))?;
        Ok(Self { http, settings })
    }

    /// Search filter header: creation date floor AND prompt-name contains
    fn search_filter(&self, prompt_name: &str) -> String {
        json!({
            "and": true,
            "left": {
                "field": "G.creationDate",
                "operation": ">",
                "value": self.settings.min_creation_date,
                "fieldType": "timestamp",
                "required": false
            },
            "right": {
                "field": "P.name",
                "operation": "Contains",
                "value": prompt_name,
                "fieldType": "string",
                "required": false
            }
        })
        .to_string()
    }

    /// Page through the listing endpoint collecting record ids.
    /// Records with evaluation type `CONTEXT` carry no conditional logic and
    /// are filtered out here.
    async fn fetch_ids(&self, prompt_name: &str) -> Result<Vec<i64>, SourceFetchError> {
        let mut ids = Vec::new();
        let mut page = 0usize;

        loop {
            let response = self
                .http
                .get(format!("{}/page/", self.settings.base_url))
                .bearer_auth(&self.settings.auth_token)
                .header("pagecode", LIST_PAGE_CODE)
                .header("searchfilter", self.search_filter(prompt_name))
                .query(&[
                    ("page", page.to_string()),
                    ("size", self.settings.page_size.to_string()),
                    ("sort", "creationDate,DESC".to_string()),
                    ("search", String::new()),
                ])
                .send()
                .await
                .map_err(|e| SourceFetchError::new(SourceKind::Erp, e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(SourceFetchError::new(
                    SourceKind::Erp,
                    "auth token expired or rejected",
                ));
            }
            if !status.is_success() {
                return Err(SourceFetchError::new(
                    SourceKind::Erp,
                    format!("listing page {} returned {}", page, status),
                ));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| SourceFetchError::new(SourceKind::Erp, e.to_string()))?;
            let chunk = body
                .get("content")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();

            if chunk.is_empty() {
                break;
            }

            let chunk_len = chunk.len();
            for item in &chunk {
                if item.get("evaluationType").and_then(|v| v.as_str()) == Some("CONTEXT") {
                    continue;
                }
                if let Some(id) = item.get("id").and_then(|v| v.as_i64()) {
                    ids.push(id);
                }
            }

            tracing::debug!(page, records = chunk_len, kept = ids.len(), "ERP listing page");

            if chunk_len < self.settings.page_size {
                break;
            }
            page += 1;
        }

        tracing::info!(ids = ids.len(), "ERP id discovery complete");
        Ok(ids)
    }

    /// Fetch one record detail with bounded retry on transient failures
    async fn fetch_detail(&self, id: i64) -> Result<serde_json::Value, DetailError> {
        let mut delay = DETAIL_BASE_DELAY;

        for attempt in 1..=DETAIL_MAX_ATTEMPTS {
            let result = self
                .http
                .get(format!("{}/{}", self.settings.base_url, id))
                .bearer_auth(&self.settings.auth_token)
                .header("pagecode", DETAIL_PAGE_CODE)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(DetailError::Auth("auth token expired or rejected".into()));
                    }
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| DetailError::Skippable(e.to_string()));
                    }
                    if !status.is_server_error() {
                        // Unexpected non-200, non-5xx: retrying will not help
                        return Err(DetailError::Skippable(format!(
                            "detail {} returned {}",
                            id, status
                        )));
                    }
                    tracing::warn!(id, attempt, %status, "ERP detail fetch failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(id, attempt, error = %e, "ERP detail fetch failed, retrying");
                }
            }

            if attempt < DETAIL_MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(DetailError::Skippable(format!(
            "record {} failed after {} attempts",
            id, DETAIL_MAX_ATTEMPTS
        )))
    }
}

#[async_trait]
impl ErpSource for ErpClient {
    async fn fetch_by_prompt_name(&self, name: &str) -> Result<Vec<RawRecord>, SourceFetchError> {
        let ids = self.fetch_ids(name).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // `buffered` preserves id order so downstream pairing stays stable
        let results: Vec<(i64, Result<serde_json::Value, DetailError>)> =
            futures::stream::iter(ids.into_iter().map(|id| async move {
                (id, self.fetch_detail(id).await)
            }))
            .buffered(DETAIL_CONCURRENCY)
            .collect()
            .await;

        let mut records = Vec::new();
        for (id, result) in results {
            match result {
                Ok(payload) => records.push(RawRecord {
                    source: SourceKind::Erp,
                    payload,
                }),
                Err(DetailError::Auth(message)) => {
                    return Err(SourceFetchError::new(SourceKind::Erp, message));
                }
                Err(DetailError::Skippable(message)) => {
                    tracing::warn!(id, %message, "Skipping ERP record");
                }
            }
        }

        tracing::info!(records = records.len(), "ERP fetch complete");
        Ok(records)
    }
}
