//! Downstream action agents.

pub mod doc;
pub mod filters;
pub mod jira;

use std::collections::HashMap;

use aloe_core::{Cluster, Triage};
use serde_json::{json, Value};

/// What a drafting or filtering prompt sees for one cluster.
fn cluster_payload(cluster: &Cluster, triage: &Triage) -> Value {
    json!({
        "idx": triage.cluster_index,
        "signature": cluster.signature,
        "service": cluster.service,
        "class": cluster.class,
        "pattern": cluster.pattern,
        "message": cluster.representative.message,
        "count": cluster.size,
        "triage": triage.verdict,
        "stack_excerpt": triage.extracted.stack_excerpt,
    })
}

/// Index a batched response (`{"items": [{"idx": .., ..}]}`) by cluster index.
///
/// A one-cluster batch may come back as a bare object; it is attributed to
/// that cluster when `single` is set.
fn items_by_idx(out: &Value, single: Option<usize>) -> HashMap<usize, Value> {
    match out.get("items").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|item| {
                let idx = item.get("idx").and_then(Value::as_u64)?;
                Some((idx as usize, item.clone()))
            })
            .collect(),
        None => single
            .filter(|_| out.get("items").is_none())
            .map(|idx| HashMap::from([(idx, out.clone())]))
            .unwrap_or_default(),
    }
}

fn text(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A field given either as a list of strings or as one multi-line string.
fn text_list(item: &Value, key: &str) -> Vec<String> {
    match item.get(key) {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
