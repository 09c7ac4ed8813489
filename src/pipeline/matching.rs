//! Cross-source key matching
//!
//! Pairs normalized records from both sources by comparison key (trimmed,
//! case-insensitive). Output order is deterministic: ERP records in their
//! fetched order (matched or ERP-only), then unmatched Notion records in
//! their fetched order.

use crate::types::{PairedKey, PolicyRecord};
use std::collections::HashMap;

pub fn match_records(erp: &[PolicyRecord], notion: &[PolicyRecord]) -> Vec<PairedKey> {
    let mut notion_by_key: HashMap<String, &PolicyRecord> = notion
        .iter()
        .map(|record| (record.compare_key(), record))
        .collect();

    let mut pairs = Vec::with_capacity(erp.len() + notion.len());

    for erp_record in erp {
        match notion_by_key.remove(&erp_record.compare_key()) {
            Some(notion_record) => pairs.push(PairedKey::Matched {
                erp: erp_record.clone(),
                notion: notion_record.clone(),
            }),
            None => pairs.push(PairedKey::ErpOnly(erp_record.clone())),
        }
    }

    // Leftover Notion records, preserving their fetched order
    for notion_record in notion {
        if notion_by_key.contains_key(&notion_record.compare_key()) {
            pairs.push(PairedKey::NotionOnly(notion_record.clone()));
        }
    }

    pairs
}
