//! FilterSuggestions: Elasticsearch exclusion clauses for noisy clusters.

use std::collections::HashMap;
use std::sync::Arc;

use aloe_conductor::agent::outputs::{FilterSuggestion, FilterSuggestionsOutput, SkippedItem};
use aloe_conductor::agent::{ActionAgent, ActionContext, ActionRequest};
use aloe_conductor::plan::schema::AgentName;
use aloe_core::AloeError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{cluster_payload, items_by_idx, text};
use crate::llm::ChatModel;
use crate::prompts::FILTER_SYSTEM;

pub const DEFAULT_BATCH_SIZE: usize = 12;

/// Shortest phrase accepted in a `match_phrase` clause.
const MIN_PHRASE_LEN: usize = 4;

pub struct FilterAgent {
    model: Arc<dyn ChatModel>,
    batch_size: usize,
}

impl FilterAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
}

fn phrase(clause: &Value) -> Result<&str, String> {
    let obj = clause.as_object().ok_or("clause must be an object")?;
    let inner = match (obj.len(), obj.get("match_phrase")) {
        (1, Some(inner)) => inner,
        _ => return Err("expected a single match_phrase".into()),
    };
    let fields = inner.as_object().ok_or("match_phrase must be an object")?;
    match (fields.len(), fields.get("log").and_then(Value::as_str)) {
        (1, Some(p)) if p.trim().len() >= MIN_PHRASE_LEN => Ok(p),
        (1, Some(_)) => Err("phrase too short to be specific".into()),
        _ => Err("match_phrase must target only the log field".into()),
    }
}

/// Accept `{"match_phrase": {"log": ..}}` or a `bool.must` of such clauses.
pub fn validate_clause(clause: &Value) -> Result<(), String> {
    if clause.get("match_phrase").is_some() {
        return phrase(clause).map(|_| ());
    }
    let must = clause
        .get("bool")
        .filter(|b| b.as_object().is_some_and(|o| o.len() == 1))
        .and_then(|b| b.get("must"))
        .and_then(Value::as_array)
        .ok_or("unsupported clause shape")?;
    if must.is_empty() {
        return Err("bool.must is empty".into());
    }
    for part in must {
        phrase(part)?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl ActionAgent for FilterAgent {
    fn name(&self) -> AgentName {
        AgentName::FilterSuggestions
    }

    async fn run(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
        cancel: CancellationToken,
    ) -> Result<Value, AloeError> {
        let selected = ctx.selected(&req.spec);
        let mut items: HashMap<usize, Value> = HashMap::new();
        let mut skipped = Vec::new();
        let mut batches = 0;
        let mut failed_batches = 0;
        let mut last_error = String::new();

        for batch in selected.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(AloeError::action_failed(self.name().as_str(), "cancelled"));
            }
            batches += 1;
            let payload: Vec<Value> = batch.iter().map(|(c, t)| cluster_payload(c, t)).collect();
            let user = format!(
                "Clusters:\n{}",
                serde_json::to_string_pretty(&payload).map_err(AloeError::from)?
            );
            let single = (batch.len() == 1).then(|| batch[0].1.cluster_index);
            match self.model.ask_json(FILTER_SYSTEM, &user).await {
                Ok(out) => items.extend(items_by_idx(&out, single)),
                Err(e) => {
                    tracing::warn!(error = %e, clusters = batch.len(), "filter batch failed");
                    failed_batches += 1;
                    last_error = e.to_string();
                    skipped.extend(batch.iter().map(|(_, t)| SkippedItem {
                        cluster_index: t.cluster_index,
                        reason: format!("filter call failed: {e}"),
                    }));
                }
            }
        }

        if batches > 0 && failed_batches == batches {
            return Err(AloeError::action_failed(self.name().as_str(), last_error));
        }

        let mut filters: Vec<FilterSuggestion> = Vec::new();
        for (cluster, triage) in &selected {
            let idx = triage.cluster_index;
            if skipped.iter().any(|s| s.cluster_index == idx) {
                continue;
            }
            let Some(clause) = items.get(&idx).and_then(|i| i.get("es_filter_clause")) else {
                skipped.push(SkippedItem {
                    cluster_index: idx,
                    reason: "no filter proposed".into(),
                });
                continue;
            };
            if let Err(why) = validate_clause(clause) {
                skipped.push(SkippedItem {
                    cluster_index: idx,
                    reason: format!("invalid clause: {why}"),
                });
                continue;
            }
            if let Some(dup) = filters.iter().find(|f| &f.es_filter_clause == clause) {
                skipped.push(SkippedItem {
                    cluster_index: idx,
                    reason: format!("same clause as cluster {}", dup.cluster_index),
                });
                continue;
            }
            filters.push(FilterSuggestion {
                cluster_index: idx,
                cluster_signature: cluster.signature.clone(),
                label: triage.label(),
                es_filter_clause: clause.clone(),
                rationale: items
                    .get(&idx)
                    .and_then(|i| text(i, "rationale"))
                    .unwrap_or_default(),
            });
        }

        tracing::info!(filters = filters.len(), skipped = skipped.len(), "filter suggestions ready");
        Ok(serde_json::to_value(FilterSuggestionsOutput { filters, skipped })?)
    }
}
