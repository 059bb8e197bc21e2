//! Typed outputs of the downstream agents, as stored in `results.json`.

use aloe_core::{Label, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cluster an agent was asked to handle but produced nothing for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedItem {
    pub cluster_index: usize,
    pub reason: String,
}

/// A drafted ticket awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketDraft {
    pub cluster_index: usize,
    pub cluster_signature: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub kql_filter: String,
    pub hits: usize,
    #[serde(default)]
    pub stack_excerpt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repro_steps: Vec<String>,
}

impl TicketDraft {
    /// Plain-text rendering kept in feedback as the draft the reviewer saw.
    pub fn snapshot_text(&self) -> String {
        format!("{}\n\n{}", self.summary, self.description)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JiraDraftsOutput {
    pub drafts: Vec<TicketDraft>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedItem>,
}

/// One suggested Elasticsearch exclusion clause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSuggestion {
    pub cluster_index: usize,
    pub cluster_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    pub es_filter_clause: Value,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterSuggestionsOutput {
    pub filters: Vec<FilterSuggestion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocDraftOutput {
    pub title: String,
    pub markdown: String,
    /// Reference returned by the publisher, when publishing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
}
