//! JiraDrafts: one bug-ticket draft per selected cluster.

use std::collections::HashMap;
use std::sync::Arc;

use aloe_conductor::agent::outputs::{JiraDraftsOutput, SkippedItem, TicketDraft};
use aloe_conductor::agent::{ActionAgent, ActionContext, ActionRequest};
use aloe_conductor::plan::schema::AgentName;
use aloe_core::{AloeError, Cluster, Triage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{cluster_payload, items_by_idx, text, text_list};
use crate::llm::ChatModel;
use crate::prompts::JIRA_SYSTEM;

pub const DEFAULT_BATCH_SIZE: usize = 10;

pub struct JiraDraftAgent {
    model: Arc<dyn ChatModel>,
    batch_size: usize,
}

impl JiraDraftAgent {
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

fn build_draft(cluster: &Cluster, triage: &Triage, item: &Value) -> TicketDraft {
    let fallback_summary = format!(
        "[{}] {}",
        cluster.service,
        cluster.pattern.chars().take(120).collect::<String>()
    );
    let stack_excerpt = text(item, "stack_trace_excerpt")
        .unwrap_or_else(|| cluster.representative.stack_excerpt());
    TicketDraft {
        cluster_index: triage.cluster_index,
        cluster_signature: cluster.signature.clone(),
        service: cluster.service.clone(),
        label: triage.label(),
        severity: triage.severity(),
        summary: text(item, "summary").unwrap_or(fallback_summary),
        description: text(item, "issue_description")
            .unwrap_or_else(|| cluster.representative.message.clone()),
        kql_filter: text(item, "kql_filter").unwrap_or_default(),
        hits: cluster.size,
        stack_excerpt,
        notes: text_list(item, "notes_for_development"),
        repro_steps: text_list(item, "steps_to_reproduce"),
    }
}

#[async_trait::async_trait]
impl ActionAgent for JiraDraftAgent {
    fn name(&self) -> AgentName {
        AgentName::JiraDrafts
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
            match self.model.ask_json(JIRA_SYSTEM, &user).await {
                Ok(out) => items.extend(items_by_idx(&out, single)),
                Err(e) => {
                    tracing::warn!(error = %e, clusters = batch.len(), "ticket drafting batch failed");
                    failed_batches += 1;
                    last_error = e.to_string();
                    skipped.extend(batch.iter().map(|(_, t)| SkippedItem {
                        cluster_index: t.cluster_index,
                        reason: format!("drafting failed: {e}"),
                    }));
                }
            }
        }

        if batches > 0 && failed_batches == batches {
            return Err(AloeError::action_failed(self.name().as_str(), last_error));
        }

        let mut drafts = Vec::new();
        for (cluster, triage) in &selected {
            if skipped.iter().any(|s| s.cluster_index == triage.cluster_index) {
                continue;
            }
            match items.get(&triage.cluster_index) {
                Some(item) => drafts.push(build_draft(cluster, triage, item)),
                None => skipped.push(SkippedItem {
                    cluster_index: triage.cluster_index,
                    reason: "no draft returned for this cluster".into(),
                }),
            }
        }

        tracing::info!(drafts = drafts.len(), skipped = skipped.len(), "ticket drafts ready");
        Ok(serde_json::to_value(JiraDraftsOutput { drafts, skipped })?)
    }
}
