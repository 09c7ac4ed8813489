//! Anthropic Claude client
//!
//! Submits both condition texts under a fixed semantic-comparison instruction
//! template and parses the reply into a structured verdict. The reply grammar
//! is deliberately narrow: the exact no-differences sentence means equivalent,
//! bullet issues mean divergent, anything else is uncertain.

use crate::config::ModelSettings;
use crate::services::{ModelError, VerdictModel};
use crate::types::{ModelVerdict, VerdictClass};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const NO_DIFFERENCES_REPLY: &str = "No significant functional differences found.";

/// Instruction template. Strict about what counts as a difference: only
/// branch/value changes that alter business logic, never formatting, naming,
/// ordering, or the trivial `else` branches the ERP system auto-appends.
const COMPARISON_PROMPT: &str = "\
# Conditional Policy Semantic Comparison

You are an expert analyst comparing two renderings of the same conditional \
business policy. Identify ONLY meaningful semantic differences that would \
cause functional failures, and be extremely strict about ignoring equivalent \
variations.

ANALYZE ONLY:
- Missing conditional branches that change business logic outcomes
- Additional conditional branches that change business logic outcomes
- Different comparison values that alter system behavior
- Missing conditions that would cause incorrect routing or processing

IGNORE:
- Formatting, bracket types, escape characters, ordering
- Variable naming and condition order when logically equivalent
- Empty or trivial 'else' branches in the ERP rendering (values that are \
empty, just dots '.', or whitespace); the ERP system appends these \
automatically

RULES:
1. If no functional issues exist, reply exactly: 'No significant functional \
differences found.'
2. Otherwise, list each issue as a bullet starting with * .

NOTION POLICY (Reference):
```
{{NOTION_TEXT}}
```

ERP POLICY (Target):
```
{{ERP_TEXT}}
```
";

pub struct ClaudeClient {
    http: reqwest::Client,
    settings: ModelSettings,
}

impl ClaudeClient {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ModelError::Fatal(e.to_string()))?;
        Ok(Self { http, settings })
    }

    fn build_prompt(notion_text: &str, erp_text: &str) -> String {
        COMPARISON_PROMPT
            .replace("{{NOTION_TEXT}}", notion_text)
            .replace("{{ERP_TEXT}}", erp_text)
    }
}

#[async_trait]
impl VerdictModel for ClaudeClient {
    async fn compare(&self, notion_text: &str, erp_text: &str) -> Result<ModelVerdict, ModelError> {
        let payload = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": [
                { "role": "user", "content": Self::build_prompt(notion_text, erp_text) }
            ],
        });

        let response = self
            .http
            .post(format!("{}/messages", self.settings.api_base))
            .header("content-type", "application/json")
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ModelError::Transient(e.to_string())
                } else {
                    ModelError::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ModelError::Transient(format!("API returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(ModelError::Fatal(format!("API error {}: {}", status, preview)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Transient(e.to_string()))?;

        let text = body
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        // Non-conforming output never raises; it degrades to Uncertain
        Ok(parse_reply(&text))
    }
}

/// Map the model's free-text reply onto a verdict. Unparseable output falls
/// back to `Uncertain` rather than erroring.
pub fn parse_reply(reply: &str) -> ModelVerdict {
    let trimmed = reply.trim();

    if trimmed == NO_DIFFERENCES_REPLY
        || trimmed == NO_DIFFERENCES_REPLY.trim_end_matches('.')
        || trimmed == format!("'{}'", NO_DIFFERENCES_REPLY)
    {
        return ModelVerdict {
            class: VerdictClass::Equivalent,
            explanation: NO_DIFFERENCES_REPLY.to_string(),
            confidence: Some(1.0),
        };
    }

    let has_bullets = trimmed.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("* ") || line.starts_with("- ")
    });
    if has_bullets {
        return ModelVerdict {
            class: VerdictClass::Divergent,
            explanation: trimmed.to_string(),
            confidence: None,
        };
    }

    if trimmed.is_empty() {
        return ModelVerdict {
            class: VerdictClass::Uncertain,
            explanation: "Model returned an empty response".to_string(),
            confidence: None,
        };
    }

    ModelVerdict {
        class: VerdictClass::Uncertain,
        explanation: trimmed.to_string(),
        confidence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_no_differences_reply_is_equivalent() {
        let verdict = parse_reply("No significant functional differences found.");
        assert_eq!(verdict.class, VerdictClass::Equivalent);
        assert_eq!(verdict.confidence, Some(1.0));
    }

    #[test]
    fn bullet_issues_are_divergent() {
        let reply = "Found issues:\n* Missing branch for Client_Type == CC\n* Else value differs";
        let verdict = parse_reply(reply);
        assert_eq!(verdict.class, VerdictClass::Divergent);
        assert!(verdict.explanation.contains("Missing branch"));
    }

    #[test]
    fn unparseable_output_falls_back_to_uncertain() {
        assert_eq!(parse_reply("").class, VerdictClass::Uncertain);
        assert_eq!(
            parse_reply("I cannot determine equivalence here.").class,
            VerdictClass::Uncertain
        );
    }

    #[test]
    fn prompt_substitutes_both_texts() {
        let prompt = ClaudeClient::build_prompt("if A then 1", "if A then 2");
        assert!(prompt.contains("if A then 1"));
        assert!(prompt.contains("if A then 2"));
        assert!(!prompt.contains("{{NOTION_TEXT}}"));
        assert!(!prompt.contains("{{ERP_TEXT}}"));
    }
}
