//! Normalization: raw source payloads → canonical policy records
//!
//! Deterministic and pure. ERP payloads carry a structured condition
//! expression tree that gets rendered to readable clause strings; Notion
//! payloads carry a flattened block tree from which the technical
//! function-value section is extracted. Both sources end up as the same
//! `{parameter, conditionalLogic}` shape so the comparator sees one format.

use crate::error::RunError;
use crate::types::{PolicyRecord, RawRecord, SourceKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Marker the technical section starts with inside a Notion page
const TECHNICAL_BLOCK_MARKER: &str = "technical ecp";
const PARAMETER_NAME_MARKER: &str = "technical ecp parameter name";

/// Normalized records plus warnings for records that yielded nothing
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub records: Vec<PolicyRecord>,
    pub warnings: Vec<String>,
}

/// One rendered branch of a policy's conditional logic
#[derive(Debug, Clone, PartialEq)]
struct Clause {
    condition: String,
    value: String,
}

fn clauses_to_condition_text(parameter: &str, clauses: &[Clause]) -> String {
    let logic: Vec<Value> = clauses
        .iter()
        .map(|c| json!({ "condition": c.condition, "value": c.value }))
        .collect();
    let doc = json!({ "parameter": parameter, "conditionalLogic": logic });
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

/// Reject duplicate comparison keys within one source; silently merging
/// them would hide malformed source data
fn check_duplicates(records: &[PolicyRecord], source: SourceKind) -> Result<(), RunError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for record in records {
        if let Some(first) = seen.insert(record.compare_key(), record.key.as_str()) {
            return Err(RunError::Normalization(format!(
                "duplicate key '{}' (first seen as '{}') in {} records",
                record.key, first, source
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ERP
// ---------------------------------------------------------------------------

/// Field spellings that differ between the sources
fn rename_field(field: &str) -> &str {
    match field {
        "maidType" => "Client_Type",
        other => other,
    }
}

fn normalize_op(op: &str) -> String {
    let op = op.to_uppercase();
    match op.as_str() {
        "=" => "==".to_string(),
        _ => op,
    }
}

/// Render an ERP expression tree node to a readable string.
/// Leaves become `field op value`; inner nodes `( left LOGIC right )`.
fn expr_to_string(node: &Value) -> String {
    let is_leaf = node.get("leaf").and_then(|v| v.as_bool()).unwrap_or(false)
        || !(node.get("left").is_some() && node.get("right").is_some());

    if is_leaf {
        let mut field = node
            .get("fieldName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if let Some(stripped) = field.strip_prefix("$context.") {
            field = stripped.to_string();
        }
        let field = rename_field(&field).to_string();
        let op = normalize_op(node.get("operation").and_then(|v| v.as_str()).unwrap_or(""));
        if op.starts_with("IS") {
            return format!("{} {}", field, op);
        }
        let value = match node.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "null".to_string(),
        };
        return format!("{} {} {}", field, op, value);
    }

    let left = expr_to_string(&node["left"]);
    let right = expr_to_string(&node["right"]);
    let logic = node
        .get("logicalOperator")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_uppercase();
    format!("( {} {} {} )", left, logic, right)
}

/// Conditions live in a different field depending on the evaluation type
fn erp_conditions(payload: &Value) -> Vec<Value> {
    let evaluation_type = payload
        .get("evaluationType")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let conditions = match evaluation_type {
        "ERP_CONDITION" => payload.get("gptPromptParamConditions"),
        "API" => payload
            .get("gptPromptParamApi")
            .and_then(|api| api.get("gptConditions")),
        _ => None,
    };

    let mut conditions: Vec<Value> = conditions
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    conditions.sort_by_key(|c| c.get("priority").and_then(|p| p.as_i64()).unwrap_or(0));
    conditions
}

fn erp_record_clauses(payload: &Value) -> Vec<Clause> {
    let mut clauses = Vec::new();

    for cond in erp_conditions(payload) {
        // Expression arrives inline or as a JSON string in `tree`
        let expr = cond.get("expression").cloned().or_else(|| {
            cond.get("tree")
                .and_then(|t| t.as_str())
                .and_then(|t| serde_json::from_str(t).ok())
        });
        let condition = match expr {
            Some(expr) => expr_to_string(&expr),
            None => String::new(),
        };
        let value = cond
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        clauses.push(Clause { condition, value });
    }

    // A non-empty default becomes the trailing `else` branch
    if let Some(default) = payload.get("defaultValue").and_then(|v| v.as_str()) {
        if !default.trim().is_empty() {
            clauses.push(Clause {
                condition: "else".to_string(),
                value: default.trim().to_string(),
            });
        }
    }

    clauses
}

pub fn normalize_erp(records: &[RawRecord]) -> Result<NormalizeOutcome, RunError> {
    let mut out = Vec::new();
    let mut warnings = Vec::new();

    for raw in records {
        let name = raw
            .payload
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if name.is_empty() {
            warnings.push("Skipping ERP record without a name".to_string());
            continue;
        }

        let clauses = erp_record_clauses(&raw.payload);
        let mut metadata = BTreeMap::new();
        if let Some(id) = raw.payload.get("id").and_then(|v| v.as_i64()) {
            metadata.insert("erp_id".to_string(), id.to_string());
        }
        if let Some(et) = raw.payload.get("evaluationType").and_then(|v| v.as_str()) {
            metadata.insert("evaluation_type".to_string(), et.to_string());
        }

        out.push(PolicyRecord {
            condition_text: clauses_to_condition_text(&name, &clauses),
            key: name,
            source: SourceKind::Erp,
            metadata,
        });
    }

    check_duplicates(&out, SourceKind::Erp)?;
    Ok(NormalizeOutcome {
        records: out,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Notion
// ---------------------------------------------------------------------------

/// Flattened block as produced by the Notion client
struct Block {
    block_type: String,
    text: String,
    depth: i64,
}

fn payload_blocks(payload: &Value) -> Vec<Block> {
    payload
        .get("blocks")
        .and_then(|b| b.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .map(|b| Block {
                    block_type: b
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("")
                        .to_string(),
                    text: b
                        .get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or("")
                        .to_string(),
                    depth: b.get("depth").and_then(|d| d.as_i64()).unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Boolean operators in Notion prose use `||`/`&&`; the ERP rendering spells
/// them out, so align before comparison
fn replace_logical_operators(text: &str) -> String {
    text.replace("||", " OR ").replace("&&", " AND ")
}

/// Strip the decorative "Value Below" marker some authors put above values
fn clean_value_text(text: &str) -> String {
    const PREFIXES: [&str; 6] = [
        "> Value Below 🔻",
        "Value Below 🔻",
        "> Value Below",
        "Value Below",
        "🔻",
        "> 🔻",
    ];

    let trimmed = text.trim();
    for prefix in PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// The technical section: first block whose text starts with the marker,
/// plus every following block nested beneath it
fn technical_section(blocks: &[Block]) -> Option<&[Block]> {
    let start = blocks
        .iter()
        .position(|b| b.text.trim().to_lowercase().starts_with(TECHNICAL_BLOCK_MARKER))?;
    let root_depth = blocks[start].depth;
    let end = blocks[start + 1..]
        .iter()
        .position(|b| b.depth <= root_depth)
        .map(|offset| start + 1 + offset)
        .unwrap_or(blocks.len());
    Some(&blocks[start..end])
}

/// Parse one page's technical section into a parameter name and clause list
fn parse_notion_page(blocks: &[Block]) -> (String, Vec<Clause>) {
    let mut parameter_name = String::new();
    let mut clauses = Vec::new();

    let mut i = 0;
    while i < blocks.len() {
        let block = &blocks[i];
        let text = block.text.trim();
        let lower = text.to_lowercase();

        if block.block_type == "toggle" && lower.starts_with(PARAMETER_NAME_MARKER) {
            if let Some((_, name)) = text.split_once(':') {
                parameter_name = name.trim().to_string();
            }
        } else if block.block_type == "toggle" && lower.contains("condition") {
            let condition_depth = block.depth;
            let mut condition = text.replace("[toggle]", "").trim().to_string();
            if condition.to_lowercase().starts_with("condition ") {
                condition = condition["condition ".len()..].trim().to_string();
            }

            // Collect the nested value blocks beneath this condition toggle
            let mut values = Vec::new();
            let mut number = 1;
            let mut j = i + 1;
            while j < blocks.len() && blocks[j].depth > condition_depth {
                let inner = &blocks[j];
                let inner_text = inner.text.trim();
                if !inner_text.is_empty() {
                    match inner.block_type.as_str() {
                        "numbered_list_item" => {
                            values.push(format!("{}. {}", number, inner_text));
                            number += 1;
                        }
                        "bulleted_list_item" => values.push(format!("- {}", inner_text)),
                        _ => values.push(inner_text.to_string()),
                    }
                }
                j += 1;
            }

            let value = clean_value_text(&values.join("\n"));
            clauses.push(Clause {
                condition: replace_logical_operators(&condition),
                value: replace_logical_operators(&value),
            });
            i = j - 1;
        }

        i += 1;
    }

    (parameter_name, clauses)
}

pub fn normalize_notion(records: &[RawRecord]) -> Result<NormalizeOutcome, RunError> {
    let mut out = Vec::new();
    let mut warnings = Vec::new();

    for raw in records {
        let page_name = raw
            .payload
            .get("page_name")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled");
        let blocks = payload_blocks(&raw.payload);

        let section = match technical_section(&blocks) {
            Some(section) => section,
            None => {
                warnings.push(format!(
                    "Page '{}' has no technical function value block, skipping",
                    page_name
                ));
                continue;
            }
        };

        let (parameter_name, clauses) = parse_notion_page(section);
        if parameter_name.is_empty() {
            warnings.push(format!(
                "Page '{}' has a technical block but no parameter name, skipping",
                page_name
            ));
            continue;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("page_name".to_string(), page_name.to_string());
        if let Some(id) = raw.payload.get("page_id").and_then(|v| v.as_str()) {
            metadata.insert("page_id".to_string(), id.to_string());
        }

        out.push(PolicyRecord {
            condition_text: clauses_to_condition_text(&parameter_name, &clauses),
            key: parameter_name,
            source: SourceKind::Notion,
            metadata,
        });
    }

    check_duplicates(&out, SourceKind::Notion)?;
    Ok(NormalizeOutcome {
        records: out,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn erp_raw(payload: Value) -> RawRecord {
        RawRecord {
            source: SourceKind::Erp,
            payload,
        }
    }

    fn notion_raw(payload: Value) -> RawRecord {
        RawRecord {
            source: SourceKind::Notion,
            payload,
        }
    }

    #[test]
    fn renders_leaf_expression_with_renames() {
        let node = json!({
            "leaf": true,
            "fieldName": "$context.maidType",
            "operation": "=",
            "value": "CC"
        });
        assert_eq!(expr_to_string(&node), "Client_Type == CC");
    }

    #[test]
    fn renders_nested_expression() {
        let node = json!({
            "left": { "leaf": true, "fieldName": "a", "operation": ">", "value": 5 },
            "right": { "leaf": true, "fieldName": "b", "operation": "is null" },
            "logicalOperator": "and"
        });
        assert_eq!(expr_to_string(&node), "( a > 5 AND b IS NULL )");
    }

    #[test]
    fn erp_conditions_sorted_by_priority_with_else() {
        let raw = erp_raw(json!({
            "id": 7,
            "name": "Doctor_Fee",
            "evaluationType": "ERP_CONDITION",
            "defaultValue": "100 ",
            "gptPromptParamConditions": [
                {
                    "priority": 2,
                    "value": "later",
                    "expression": { "leaf": true, "fieldName": "x", "operation": "=", "value": "2" }
                },
                {
                    "priority": 1,
                    "value": "first",
                    "expression": { "leaf": true, "fieldName": "x", "operation": "=", "value": "1" }
                }
            ]
        }));

        let outcome = normalize_erp(&[raw]).unwrap();
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.key, "Doctor_Fee");
        assert_eq!(record.metadata["erp_id"], "7");

        let doc: Value = serde_json::from_str(&record.condition_text).unwrap();
        let logic = doc["conditionalLogic"].as_array().unwrap();
        assert_eq!(logic.len(), 3);
        assert_eq!(logic[0]["value"], "first");
        assert_eq!(logic[1]["value"], "later");
        assert_eq!(logic[2]["condition"], "else");
        assert_eq!(logic[2]["value"], "100");
    }

    #[test]
    fn erp_api_type_reads_nested_conditions() {
        let raw = erp_raw(json!({
            "name": "Api_Param",
            "evaluationType": "API",
            "gptPromptParamApi": {
                "gptConditions": [
                    {
                        "priority": 1,
                        "value": "v",
                        "tree": "{\"leaf\":true,\"fieldName\":\"f\",\"operation\":\"=\",\"value\":\"1\"}"
                    }
                ]
            }
        }));

        let outcome = normalize_erp(&[raw]).unwrap();
        let doc: Value = serde_json::from_str(&outcome.records[0].condition_text).unwrap();
        assert_eq!(doc["conditionalLogic"][0]["condition"], "f == 1");
    }

    #[test]
    fn erp_duplicate_keys_are_rejected() {
        let a = erp_raw(json!({ "name": "Same_Key", "evaluationType": "X" }));
        let b = erp_raw(json!({ "name": "same_key ", "evaluationType": "X" }));
        let err = normalize_erp(&[a, b]).unwrap_err();
        assert!(matches!(err, RunError::Normalization(_)));
    }

    #[test]
    fn erp_record_without_name_is_warned_and_skipped() {
        let outcome = normalize_erp(&[erp_raw(json!({ "evaluationType": "X" }))]).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    fn notion_page(blocks: Value) -> RawRecord {
        notion_raw(json!({
            "page_id": "abc",
            "page_name": "Doctor Fee",
            "blocks": blocks
        }))
    }

    #[test]
    fn notion_page_parses_parameter_and_conditions() {
        let raw = notion_page(json!([
            { "type": "heading_1", "text": "Technical ECP", "depth": 0 },
            { "type": "toggle", "text": "Technical ECP Parameter Name: Doctor_Fee", "depth": 1 },
            { "type": "toggle", "text": "Condition Client_Type == CC || Client_Type == MV", "depth": 1 },
            { "type": "numbered_list_item", "text": "Charge base fee", "depth": 2 },
            { "type": "numbered_list_item", "text": "Apply discount", "depth": 2 },
            { "type": "toggle", "text": "Condition else", "depth": 1 },
            { "type": "paragraph", "text": "> Value Below 🔻", "depth": 2 },
            { "type": "paragraph", "text": "standard fee", "depth": 2 }
        ]));

        let outcome = normalize_notion(&[raw]).unwrap();
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.key, "Doctor_Fee");

        let doc: Value = serde_json::from_str(&record.condition_text).unwrap();
        let logic = doc["conditionalLogic"].as_array().unwrap();
        assert_eq!(logic.len(), 2);
        assert_eq!(logic[0]["condition"], "Client_Type == CC  OR  Client_Type == MV");
        assert_eq!(logic[0]["value"], "1. Charge base fee\n2. Apply discount");
        assert_eq!(logic[1]["condition"], "else");
        assert_eq!(logic[1]["value"], "standard fee");
    }

    #[test]
    fn notion_page_without_technical_block_is_skipped() {
        let raw = notion_page(json!([
            { "type": "paragraph", "text": "Business description only", "depth": 0 }
        ]));
        let outcome = normalize_notion(&[raw]).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("no technical function value block"));
    }

    #[test]
    fn technical_section_excludes_sibling_blocks() {
        let blocks = vec![
            Block { block_type: "heading_1".into(), text: "Technical ECP".into(), depth: 1 },
            Block { block_type: "toggle".into(), text: "Technical ECP Parameter Name: X".into(), depth: 2 },
            Block { block_type: "heading_1".into(), text: "Another Section".into(), depth: 1 },
        ];
        let section = technical_section(&blocks).unwrap();
        assert_eq!(section.len(), 2);
    }
}
