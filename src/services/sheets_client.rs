//! Report writers
//!
//! `SheetsClient` persists the comparison report to a shared Google Sheet via
//! the Sheets/Drive REST APIs using a deployment-provided OAuth token.
//! `CsvReportWriter` is the local fallback when Sheets is not configured.
//! Either way the writer returns a location the caller can hand to users.

use crate::config::SheetsSettings;
use crate::pipeline::report::{ReportRow, RowCategory};
use crate::services::{ReportWriteError, ReportWriter};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

/// Google Sheets rejects cells above 50k characters; leave headroom
const MAX_CELL_CHARS: usize = 45_000;
const WRITE_BATCH_ROWS: usize = 100;

const HEADER: [&str; 4] = ["Parameter", "Notion JSON", "ERP JSON", "Comparison"];

/// Split text into chunks that fit within a sheet cell, preferring to break
/// at newlines, commas, or spaces near the limit.
pub fn split_large_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining: &str = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte index of the max_chars-th character
        let hard_limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let mut split_point = hard_limit;
        for boundary in ['\n', ',', ' '] {
            if let Some(idx) = remaining[..hard_limit].rfind(boundary) {
                // Only use a boundary if it is not too early in the chunk
                if idx > hard_limit * 4 / 5 {
                    split_point = idx + boundary.len_utf8();
                    break;
                }
            }
        }

        chunks.push(remaining[..split_point].to_string());
        remaining = &remaining[split_point..];
    }

    chunks
}

/// Expand logical rows into sheet rows: section header rows between
/// categories, continuation rows for oversized cells.
fn to_sheet_rows(rows: &[ReportRow]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut current_category: Option<RowCategory> = None;

    for row in rows {
        if current_category != Some(row.category) {
            match row.category {
                RowCategory::NotionOnly => out.push(vec![
                    "=== NOTION-ONLY PARAMETERS ===".to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]),
                RowCategory::ErpOnly => out.push(vec![
                    "=== ERP-ONLY PARAMETERS ===".to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]),
                RowCategory::Matched => {}
            }
            current_category = Some(row.category);
        }

        let notion_chunks = split_large_text(&row.notion_json, MAX_CELL_CHARS);
        let erp_chunks = split_large_text(&row.erp_json, MAX_CELL_CHARS);
        let max_chunks = notion_chunks.len().max(erp_chunks.len());

        for i in 0..max_chunks {
            let label = if i == 0 {
                row.key.clone()
            } else {
                format!("  └─ {} (cont.)", row.key)
            };
            let verdict = if i == 0 {
                row.verdict_text.clone()
            } else {
                String::new()
            };
            out.push(vec![
                label,
                notion_chunks.get(i).cloned().unwrap_or_default(),
                erp_chunks.get(i).cloned().unwrap_or_default(),
                verdict,
            ]);
        }
    }

    out
}

pub struct SheetsClient {
    http: reqwest::Client,
    settings: SheetsSettings,
    access_token: String,
}

impl SheetsClient {
    pub fn new(settings: SheetsSettings, access_token: String) -> Result<Self, ReportWriteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ReportWriteError(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            access_token,
        })
    }

    async fn create_spreadsheet(&self, title: &str) -> Result<String, ReportWriteError> {
        let response = self
            .http
            .post(format!("{}/spreadsheets", self.settings.api_base))
            .bearer_auth(&self.access_token)
            .json(&json!({ "properties": { "title": title } }))
            .send()
            .await
            .map_err(|e| ReportWriteError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReportWriteError(format!(
                "spreadsheet creation returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReportWriteError(e.to_string()))?;
        body.get("spreadsheetId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ReportWriteError("spreadsheet id missing from response".to_string()))
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        start_row: usize,
        values: &[Vec<String>],
    ) -> Result<(), ReportWriteError> {
        let end_row = start_row + values.len() - 1;
        let range = format!("Sheet1!A{}:D{}", start_row, end_row);
        let url = format!(
            "{}/spreadsheets/{}/values/{}?valueInputOption=RAW",
            self.settings.api_base, spreadsheet_id, range
        );

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "range": range, "values": values }))
            .send()
            .await
            .map_err(|e| ReportWriteError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReportWriteError(format!(
                "values write for {} returned {}",
                range,
                response.status()
            )));
        }
        Ok(())
    }

    /// Anyone-with-the-link sharing; failure here is logged but not fatal,
    /// the sheet still exists for the service account
    async fn share_with_link(&self, spreadsheet_id: &str) {
        let url = format!(
            "{}/files/{}/permissions",
            self.settings.drive_api_base, spreadsheet_id
        );
        let result = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "type": "anyone", "role": "reader" }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(spreadsheet_id, "Report shared with anyone who has the link");
            }
            Ok(response) => {
                tracing::warn!(
                    spreadsheet_id,
                    status = %response.status(),
                    "Public sharing failed; sheet created but not shared"
                );
            }
            Err(e) => {
                tracing::warn!(spreadsheet_id, error = %e, "Public sharing request failed");
            }
        }
    }
}

#[async_trait]
impl ReportWriter for SheetsClient {
    async fn write(&self, rows: &[ReportRow]) -> Result<String, ReportWriteError> {
        let title = format!("ERP-Notion Comparison {}", Utc::now().format("%Y-%m-%d %H:%M"));
        let spreadsheet_id = self.create_spreadsheet(&title).await?;

        let mut values: Vec<Vec<String>> =
            vec![HEADER.iter().map(|s| s.to_string()).collect()];
        values.extend(to_sheet_rows(rows));

        // The values API has request size limits; write in batches
        let mut row_cursor = 1usize;
        for batch in values.chunks(WRITE_BATCH_ROWS) {
            self.write_values(&spreadsheet_id, row_cursor, batch).await?;
            row_cursor += batch.len();
        }

        self.share_with_link(&spreadsheet_id).await;

        Ok(format!(
            "https://docs.google.com/spreadsheets/d/{}",
            spreadsheet_id
        ))
    }
}

/// Local CSV fallback used when no Sheets token is configured
pub struct CsvReportWriter {
    dir: PathBuf,
}

impl CsvReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(['"', ',', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[async_trait]
impl ReportWriter for CsvReportWriter {
    async fn write(&self, rows: &[ReportRow]) -> Result<String, ReportWriteError> {
        let path = self.dir.join(format!(
            "comparison_results_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));

        let mut content = String::new();
        content.push_str(&HEADER.join(","));
        content.push('\n');
        for row in to_sheet_rows(rows) {
            let line: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
            content.push_str(&line.join(","));
            content.push('\n');
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ReportWriteError(e.to_string()))?;

        Ok(path.display().to_string())
    }
}
