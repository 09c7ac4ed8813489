//! Core data model for the comparison pipeline
//!
//! Records flow through the pipeline as:
//! RawRecord → PolicyRecord → PairedKey → Verdict → report rows

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which external system a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Erp,
    Notion,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Erp => write!(f, "ERP"),
            SourceKind::Notion => write!(f, "Notion"),
        }
    }
}

/// A record as fetched from a source, before normalization.
///
/// The payload shape is whatever the source client returned; nothing beyond
/// that is assumed until the normalizer runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: SourceKind,
    pub payload: serde_json::Value,
}

/// Canonical policy record, the same shape for both sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Comparison key (parameter name), non-empty and unique per source
    pub key: String,
    pub source: SourceKind,
    /// Human-readable rendering of the record's conditional logic
    pub condition_text: String,
    /// Auxiliary fields carried along for reporting (id, evaluation type, ...)
    pub metadata: BTreeMap<String, String>,
}

impl PolicyRecord {
    /// Key under the documented matching policy: whitespace-trimmed,
    /// case-insensitive. The source systems disagree on casing, so exact
    /// byte comparison would produce spurious one-sided keys.
    pub fn compare_key(&self) -> String {
        compare_key(&self.key)
    }
}

/// Normalize a key for cross-source matching (trim + lowercase)
pub fn compare_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Pairing outcome for one comparison key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairedKey {
    Matched {
        erp: PolicyRecord,
        notion: PolicyRecord,
    },
    ErpOnly(PolicyRecord),
    NotionOnly(PolicyRecord),
}

impl PairedKey {
    /// Display key for this pair (the Notion spelling wins for matched pairs,
    /// mirroring the reference sheet layout)
    pub fn key(&self) -> &str {
        match self {
            PairedKey::Matched { notion, .. } => &notion.key,
            PairedKey::ErpOnly(rec) | PairedKey::NotionOnly(rec) => &rec.key,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, PairedKey::Matched { .. })
    }
}

/// Equivalence classification for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictClass {
    Equivalent,
    Divergent,
    Uncertain,
    /// Key exists in only one source; the AI comparator is never invoked
    MissingCounterpart,
}

/// Structured response from the language-model service for one matched pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub class: VerdictClass,
    pub explanation: String,
    pub confidence: Option<f64>,
}

/// Final per-key outcome, AI-rendered for matched pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub pair: PairedKey,
    pub class: VerdictClass,
    pub explanation: String,
    pub confidence: Option<f64>,
}

/// Aggregate counters for a completed (or cut-short) run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub notion_records: usize,
    pub erp_records: usize,
    /// Matched pairs submitted to the comparator (attempted counts too)
    pub total_comparisons: usize,
    /// One row per key in the final report
    pub total_rows: usize,
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
}

/// Serialize durations as fractional seconds for the API response
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
