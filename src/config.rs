//! Configuration resolution
//!
//! Tunables come from a TOML file (path in `POLICY_PARITY_CONFIG`, default
//! `policy-parity.toml` if present), secrets from environment variables.
//! ENV takes priority over TOML for every value it names.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Service settings, fully defaulted so the TOML file may be sparse or absent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub erp: ErpSettings,
    pub notion: NotionSettings,
    pub model: ModelSettings,
    pub sheets: SheetsSettings,
    pub run: RunSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErpSettings {
    pub base_url: String,
    /// Bearer token for the ERP backend (`ERP_AUTH_TOKEN`)
    pub auth_token: String,
    pub page_size: usize,
    /// Only parameters created after this timestamp are fetched
    pub min_creation_date: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotionSettings {
    /// Integration token (`NOTION_TOKEN`)
    pub token: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Anthropic API key (`ANTHROPIC_API_KEY`)
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetsSettings {
    /// OAuth access token for the Sheets/Drive APIs (`GOOGLE_SHEETS_TOKEN`).
    /// When absent the report falls back to a local CSV file.
    pub access_token: Option<String>,
    pub api_base: String,
    pub drive_api_base: String,
    /// Directory for the CSV fallback report
    pub fallback_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Matched pairs compared in parallel
    pub comparator_concurrency: usize,
    /// Ceiling per pipeline stage; a hung collaborator must not leave the
    /// run reporting `Running` forever
    pub stage_timeout_secs: u64,
    pub retry: RetrySettings,
}

/// Bounded retry with exponential backoff for transient model failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            erp: ErpSettings::default(),
            notion: NotionSettings::default(),
            model: ModelSettings::default(),
            sheets: SheetsSettings::default(),
            run: RunSettings::default(),
        }
    }
}

impl Default for ErpSettings {
    fn default() -> Self {
        Self {
            base_url: "https://erpbackendpro.maids.cc/chatai/gptpromptparameter".to_string(),
            auth_token: String::new(),
            page_size: 100,
            min_creation_date: "2025-05-01 12:17:57".to_string(),
        }
    }
}

impl Default for NotionSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: "https://api.notion.com/v1".to_string(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-sonnet-20240229".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
        }
    }
}

impl Default for SheetsSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            api_base: "https://sheets.googleapis.com/v4".to_string(),
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            fallback_dir: ".".to_string(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            comparator_concurrency: 4,
            stage_timeout_secs: 600,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Delay before the given retry (attempt numbering starts at 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let ms = self.base_delay_ms as f64 * self.multiplier.powi(exp as i32);
        Duration::from_millis(ms as u64)
    }
}

impl RunSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Settings {
    /// Load settings: defaults → TOML file → environment overrides
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("POLICY_PARITY_CONFIG")
            .unwrap_or_else(|_| "policy-parity.toml".to_string());

        let mut settings = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            let parsed: Settings = toml::from_str(&content)?;
            info!("Settings loaded from {}", path);
            parsed
        } else {
            info!("No TOML config at {}, using defaults", path);
            Settings::default()
        };

        settings.apply_env();
        settings.warn_missing();
        Ok(settings)
    }

    /// Environment variables override TOML for secrets and the bind address
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("POLICY_PARITY_BIND") {
            self.bind_addr = addr;
        }
        if let Ok(token) = std::env::var("ERP_AUTH_TOKEN") {
            self.erp.auth_token = token;
        }
        if let Ok(token) = std::env::var("NOTION_TOKEN") {
            self.notion.token = token;
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.model.api_key = key;
        }
        if let Ok(token) = std::env::var("GOOGLE_SHEETS_TOKEN") {
            self.sheets.access_token = Some(token);
        }
    }

    fn warn_missing(&self) {
        if self.erp.auth_token.trim().is_empty() {
            warn!("ERP auth token not configured; ERP fetches will fail with an auth error");
        }
        if self.notion.token.trim().is_empty() {
            warn!("Notion token not configured; Notion fetches will fail with an auth error");
        }
        if self.model.api_key.trim().is_empty() {
            warn!("Anthropic API key not configured; comparisons will fall back to uncertain verdicts");
        }
        if self.sheets.access_token.is_none() {
            info!("Google Sheets token not configured; reports will be written as local CSV");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_toml_fills_in_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:9000"

            [run]
            comparator_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");
        assert_eq!(settings.run.comparator_concurrency, 2);
        assert_eq!(settings.run.retry.max_attempts, 3);
        assert_eq!(settings.erp.page_size, 100);
    }

    #[test]
    fn retry_delays_double() {
        let retry = RetrySettings::default();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(4000));
    }
}
