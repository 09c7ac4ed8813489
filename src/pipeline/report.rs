//! Report assembly
//!
//! Turns per-key verdicts into the logical rows the report writers persist:
//! matched pairs first, then Notion-only keys, then ERP-only keys, each
//! section in the deterministic order the matcher produced.

use crate::types::{PairedKey, RunSummary, Verdict, VerdictClass};
use std::time::Duration;

/// Which report section a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCategory {
    Matched,
    NotionOnly,
    ErpOnly,
}

/// One logical report row; writers may expand it into several physical rows
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub key: String,
    pub notion_json: String,
    pub erp_json: String,
    pub verdict_text: String,
    pub category: RowCategory,
}

fn verdict_text(verdict: &Verdict) -> String {
    match verdict.class {
        VerdictClass::MissingCounterpart => match &verdict.pair {
            PairedKey::NotionOnly(_) => "Parameter exists only in Notion".to_string(),
            PairedKey::ErpOnly(_) => "Parameter exists only in ERP".to_string(),
            PairedKey::Matched { .. } => verdict.explanation.clone(),
        },
        _ => verdict.explanation.clone(),
    }
}

fn to_row(verdict: &Verdict) -> ReportRow {
    let (notion_json, erp_json, category) = match &verdict.pair {
        PairedKey::Matched { erp, notion } => (
            notion.condition_text.clone(),
            erp.condition_text.clone(),
            RowCategory::Matched,
        ),
        PairedKey::NotionOnly(record) => (
            record.condition_text.clone(),
            String::new(),
            RowCategory::NotionOnly,
        ),
        PairedKey::ErpOnly(record) => (
            String::new(),
            record.condition_text.clone(),
            RowCategory::ErpOnly,
        ),
    };

    ReportRow {
        key: verdict.pair.key().to_string(),
        notion_json,
        erp_json,
        verdict_text: verdict_text(verdict),
        category,
    }
}

/// Build the final row set: matched, then Notion-only, then ERP-only.
/// Relative order within each section follows the verdict order.
pub fn build_rows(verdicts: &[Verdict]) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = Vec::with_capacity(verdicts.len());
    for category in [RowCategory::Matched, RowCategory::NotionOnly, RowCategory::ErpOnly] {
        rows.extend(
            verdicts
                .iter()
                .map(to_row)
                .filter(|row| row.category == category),
        );
    }
    rows
}

/// Aggregate counters for the run response
pub fn summarize(
    verdicts: &[Verdict],
    erp_records: usize,
    notion_records: usize,
    processing_time: Duration,
) -> RunSummary {
    RunSummary {
        erp_records,
        notion_records,
        total_comparisons: verdicts.iter().filter(|v| v.pair.is_matched()).count(),
        total_rows: verdicts.len(),
        processing_time,
    }
}
