//! Fetch stage
//!
//! Pulls raw records from both sources according to the run's selectors.
//! A selector left empty skips that source with a warning; a fetch error
//! from either source aborts the run.

use crate::error::RunError;
use crate::progress::ProgressTracker;
use crate::services::{ErpSource, NotionClient, NotionSource};
use crate::types::RawRecord;

/// What to fetch from each source; at least one selector must be present
#[derive(Debug, Clone, Default)]
pub struct Selectors {
    /// ERP prompt-name filter (substring match on the backend)
    pub erp_prompt_name: Option<String>,
    /// Notion page URL or bare page id
    pub notion_page_url: Option<String>,
}

impl Selectors {
    pub fn is_empty(&self) -> bool {
        self.selector(&self.erp_prompt_name).is_none()
            && self.selector(&self.notion_page_url).is_none()
    }

    fn selector<'a>(&self, field: &'a Option<String>) -> Option<&'a str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

pub struct FetchedRecords {
    pub erp: Vec<RawRecord>,
    pub notion: Vec<RawRecord>,
}

pub async fn fetch_stage(
    erp_source: &dyn ErpSource,
    notion_source: &dyn NotionSource,
    selectors: &Selectors,
    tracker: &ProgressTracker,
) -> Result<FetchedRecords, RunError> {
    let erp = match selectors.selector(&selectors.erp_prompt_name) {
        Some(prompt_name) => {
            tracker
                .info(format!("Fetching ERP records for prompt '{}'", prompt_name))
                .await;
            let records = erp_source.fetch_by_prompt_name(prompt_name).await?;
            if records.is_empty() {
                tracker
                    .warn(format!("No ERP records found for prompt '{}'", prompt_name))
                    .await;
            } else {
                tracker
                    .info(format!("Fetched {} ERP records", records.len()))
                    .await;
            }
            records
        }
        None => {
            tracker
                .warn("No ERP prompt name given; skipping ERP fetch")
                .await;
            Vec::new()
        }
    };
    tracker.set_percentage(10).await;

    let notion = match selectors.selector(&selectors.notion_page_url) {
        Some(url) => {
            let page_id = NotionClient::extract_page_id(url)?;
            tracker
                .info(format!("Fetching Notion pages under {}", page_id))
                .await;
            let records = notion_source.fetch_page_records(&page_id).await?;
            if records.is_empty() {
                tracker.warn("No Notion policy pages found").await;
            } else {
                tracker
                    .info(format!("Fetched {} Notion pages", records.len()))
                    .await;
            }
            records
        }
        None => {
            tracker
                .warn("No Notion page given; skipping Notion fetch")
                .await;
            Vec::new()
        }
    };
    tracker.set_percentage(20).await;

    Ok(FetchedRecords { erp, notion })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_selectors_count_as_empty() {
        assert!(Selectors::default().is_empty());
        assert!(Selectors {
            erp_prompt_name: Some("   ".to_string()),
            notion_page_url: Some(String::new()),
        }
        .is_empty());
        assert!(!Selectors {
            erp_prompt_name: Some("DoctorFee".to_string()),
            notion_page_url: None,
        }
        .is_empty());
    }
}
