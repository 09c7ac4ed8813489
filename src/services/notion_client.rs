//! Notion API client
//!
//! Queries the policy database for pages awaiting validation, then walks each
//! page's block tree depth-first and flattens it into `{type, text, depth}`
//! records. The normalizer later locates the technical-function-value block
//! inside that flattened sequence; this client stays wire-level.

use crate::config::NotionSettings;
use crate::services::{NotionSource, SourceFetchError};
use crate::types::{RawRecord, SourceKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;
const CHILDREN_MAX_RETRIES: u32 = 5;
/// ~3 requests per second keeps the integration under Notion's rate limit
const RATE_LIMIT_MS: u64 = 334;

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Notion rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

pub struct NotionClient {
    http: reqwest::Client,
    settings: NotionSettings,
    rate_limiter: Arc<RateLimiter>,
}

impl NotionClient {
    pub fn new(settings: NotionSettings) -> Result<Self, SourceFetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceFetchError::new(SourceKind::Notion, e.to_string()))?;
        Ok(Self {
            http,
            settings,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
        })
    }

    fn err(message: impl Into<String>) -> SourceFetchError {
        SourceFetchError::new(SourceKind::Notion, message)
    }

    /// Accepts a bare id or a full notion.so URL; returns the dash-less id
    pub fn extract_page_id(input: &str) -> Result<String, SourceFetchError> {
        let input = input.trim();
        if input.contains("notion.so") {
            for part in input.split('/').rev() {
                let candidate = part.split('?').next().unwrap_or("");
                if candidate.len() >= 32 {
                    return Ok(candidate.replace('-', ""));
                }
            }
            return Err(Self::err(format!("unrecognized Notion URL: {}", input)));
        }
        let bare = input.replace('-', "");
        if bare.len() == 32 {
            return Ok(bare);
        }
        Err(Self::err(format!("invalid Notion page id: {}", input)))
    }

    async fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.rate_limiter.wait().await;
        self.http
            .get(url)
            .bearer_auth(&self.settings.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn post(&self, url: &str, body: Value) -> reqwest::RequestBuilder {
        self.rate_limiter.wait().await;
        self.http
            .post(url)
            .bearer_auth(&self.settings.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
    }

    /// List every child of a block, following cursors. 429s and timeouts are
    /// retried with exponential backoff; inaccessible blocks (400/403/404)
    /// yield whatever was collected so far rather than failing the page.
    async fn fetch_children(&self, block_id: &str) -> Result<Vec<Value>, SourceFetchError> {
        let mut children = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/blocks/{}/children?page_size={}",
                self.settings.api_base, block_id, PAGE_SIZE
            );
            if let Some(c) = &cursor {
                url.push_str(&format!("&start_cursor={}", c));
            }

            let mut body: Option<Value> = None;
            let mut delay = Duration::from_secs(2);
            for attempt in 1..=CHILDREN_MAX_RETRIES {
                let result = self.get(&url).await.send().await;
                match result {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            body = Some(
                                response.json().await.map_err(|e| Self::err(e.to_string()))?,
                            );
                            break;
                        }
                        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                            tracing::warn!(
                                block_id,
                                attempt,
                                "Notion rate limited, backing off {:?}",
                                delay
                            );
                        } else if status == reqwest::StatusCode::UNAUTHORIZED {
                            return Err(Self::err("integration token rejected"));
                        } else {
                            // 400/403/404: block is inaccessible, not fatal
                            tracing::warn!(block_id, %status, "Skipping inaccessible block's children");
                            return Ok(children);
                        }
                    }
                    Err(e) if e.is_timeout() => {
                        tracing::warn!(block_id, attempt, "Notion request timeout, retrying");
                    }
                    Err(e) => return Err(Self::err(e.to_string())),
                }
                if attempt == CHILDREN_MAX_RETRIES {
                    tracing::warn!(block_id, "Giving up on block children after repeated failures");
                    return Ok(children);
                }
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            let body = match body {
                Some(b) => b,
                None => return Ok(children),
            };

            if let Some(results) = body.get("results").and_then(|r| r.as_array()) {
                children.extend(results.iter().cloned());
            }

            if body.get("has_more").and_then(|v| v.as_bool()) == Some(true) {
                cursor = body
                    .get("next_cursor")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(children)
    }

    /// Preorder walk of a page's block tree, flattened with depth markers
    async fn flatten_blocks(&self, root_id: &str) -> Result<Vec<Value>, SourceFetchError> {
        let mut flat = Vec::new();

        // Explicit stack; children are pushed reversed so document order pops first
        let mut pending: Vec<(Value, usize)> = self
            .fetch_children(root_id)
            .await?
            .into_iter()
            .rev()
            .map(|b| (b, 0))
            .collect();

        while let Some((block, depth)) = pending.pop() {
            let block_type = block
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            let text = plain_text(&block);
            let has_children = block.get("has_children").and_then(|v| v.as_bool()) == Some(true);
            let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("");

            if has_children && !id.is_empty() {
                let children = self.fetch_children(id).await?;
                for child in children.into_iter().rev() {
                    pending.push((child, depth + 1));
                }
            }

            flat.push(json!({ "type": block_type, "text": text, "depth": depth }));
        }

        Ok(flat)
    }

    /// Build the validation filter when the database carries the expected
    /// checkbox properties: "To be Validated" true AND "Technical Validated"
    /// false. Databases without those columns are fetched unfiltered.
    async fn validation_filter(&self, database_id: &str) -> Result<Option<Value>, SourceFetchError> {
        let url = format!("{}/databases/{}", self.settings.api_base, database_id);
        let response = self
            .get(&url)
            .await
            .send()
            .await
            .map_err(|e| Self::err(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Self::err("integration token rejected"));
        }
        if !status.is_success() {
            return Err(Self::err(format!("database lookup returned {}", status)));
        }

        let info: Value = response.json().await.map_err(|e| Self::err(e.to_string()))?;
        let props = match info.get("properties").and_then(|p| p.as_object()) {
            Some(p) => p,
            None => return Ok(None),
        };

        let find_checkbox = |wanted: &str| {
            props.iter().find_map(|(name, prop)| {
                let matches = name.trim().eq_ignore_ascii_case(wanted);
                let is_checkbox = prop.get("type").and_then(|t| t.as_str()) == Some("checkbox");
                (matches && is_checkbox).then(|| name.clone())
            })
        };

        let to_validate = find_checkbox("to be validated");
        let tech_validated = find_checkbox("technical validated");

        Ok(match (to_validate, tech_validated) {
            (Some(a), Some(b)) => Some(json!({
                "and": [
                    { "property": a, "checkbox": { "equals": true } },
                    { "property": b, "checkbox": { "equals": false } },
                ]
            })),
            (Some(a), None) => Some(json!({ "property": a, "checkbox": { "equals": true } })),
            _ => None,
        })
    }

    /// Query all pages of the database, following cursors
    async fn query_pages(&self, database_id: &str) -> Result<Vec<Value>, SourceFetchError> {
        let filter = self.validation_filter(database_id).await?;
        let url = format!("{}/databases/{}/query", self.settings.api_base, database_id);

        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(f) = &filter {
                body["filter"] = f.clone();
            }
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }

            let response = self
                .post(&url, body)
                .await
                .send()
                .await
                .map_err(|e| Self::err(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(Self::err("integration token rejected"));
            }
            if !status.is_success() {
                return Err(Self::err(format!("database query returned {}", status)));
            }

            let result: Value = response.json().await.map_err(|e| Self::err(e.to_string()))?;
            if let Some(items) = result.get("results").and_then(|r| r.as_array()) {
                pages.extend(items.iter().cloned());
            }

            if result.get("has_more").and_then(|v| v.as_bool()) == Some(true) {
                cursor = result
                    .get("next_cursor")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(pages)
    }
}

#[async_trait]
impl NotionSource for NotionClient {
    async fn fetch_page_records(&self, page_id: &str) -> Result<Vec<RawRecord>, SourceFetchError> {
        let database_id = Self::extract_page_id(page_id)?;
        let pages = self.query_pages(&database_id).await?;
        tracing::info!(pages = pages.len(), "Notion database query complete");

        let mut records = Vec::new();
        for page in &pages {
            let id = match page.get("id").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            let page_name = page_title(page);
            let blocks = self.flatten_blocks(id).await?;

            records.push(RawRecord {
                source: SourceKind::Notion,
                payload: json!({
                    "page_id": id,
                    "page_name": page_name,
                    "blocks": blocks,
                }),
            });
        }

        tracing::info!(records = records.len(), "Notion fetch complete");
        Ok(records)
    }
}

/// Concatenate a block's rich text into a plain string. Text fragments use
/// their literal content; mentions, equations and anything else fall back to
/// the API-provided `plain_text`.
fn plain_text(block: &Value) -> String {
    let block_type = match block.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => return String::new(),
    };
    let rich_text = match block
        .get(block_type)
        .and_then(|b| b.get("rich_text"))
        .and_then(|rt| rt.as_array())
    {
        Some(rt) => rt,
        None => return String::new(),
    };

    rich_text.iter().map(rich_text_piece).collect()
}

fn rich_text_piece(piece: &Value) -> String {
    match piece.get("type").and_then(|t| t.as_str()) {
        Some("text") => piece
            .get("text")
            .and_then(|t| t.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => piece
            .get("plain_text")
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

/// Page title from whichever property carries the `title` type
fn page_title(page: &Value) -> String {
    let props = match page.get("properties").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return "Untitled".to_string(),
    };

    for prop in props.values() {
        if prop.get("type").and_then(|t| t.as_str()) != Some("title") {
            continue;
        }
        if let Some(parts) = prop.get("title").and_then(|t| t.as_array()) {
            let title: String = parts.iter().map(rich_text_piece).collect();
            let title = title.trim().to_string();
            if !title.is_empty() {
                return title;
            }
        }
    }

    "Untitled".to_string()
}
