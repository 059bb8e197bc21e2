use aloe_core::AloeError;
use serde_json::{json, Value};

use crate::plan::decision::{DecisionRequest, DecisionSource};
use crate::plan::schema::{PlanSource, DEFAULT_FILTER_LABELS};

/// Static heuristics, used when no reasoning service is wanted.
///
/// Tickets when any internal error is high priority, filters when anything
/// was triaged, documentation when either of those runs.
pub struct BaselineDecision {
    pub max_tickets: usize,
}

impl Default for BaselineDecision {
    fn default() -> Self {
        Self { max_tickets: 10 }
    }
}

#[async_trait::async_trait]
impl DecisionSource for BaselineDecision {
    fn kind(&self) -> PlanSource {
        PlanSource::Baseline
    }

    async fn decide(&self, req: &DecisionRequest<'_>) -> Result<Value, AloeError> {
        let s = req.summary;
        let run_jira = s.internal_high_count > 0;
        let run_filters = s.triaged_cluster_count > 0;
        let run_doc = run_jira || run_filters;

        let mut sections = vec!["summary"];
        if run_jira {
            sections.push("jira_links");
        }
        if run_filters || s.has_external || s.has_noise {
            sections.push("filters");
        }

        Ok(json!({
            "actions": [
                {
                    "agent": "JiraDrafts",
                    "run": run_jira,
                    "max_tickets": if run_jira { Some(self.max_tickets) } else { None },
                },
                {
                    "agent": "FilterSuggestions",
                    "run": run_filters,
                    "for_labels": if run_filters { Some(DEFAULT_FILTER_LABELS) } else { None },
                    "min_count": if run_filters { Some(1) } else { None },
                },
                {
                    "agent": "ConfluenceDraft",
                    "run": run_doc,
                    "include_sections": if run_doc { Some(sections) } else { None },
                },
            ],
            "global_policy": {"ticket_strategy": "baseline", "noise_handling": "basic_filters"},
            "reason": format!(
                "baseline heuristics: {} high-priority internal errors, {} triaged clusters",
                s.internal_high_count, s.triaged_cluster_count
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parser::parse_decision;
    use aloe_core::{Label, Summary};
    use aloe_ledger::FeedbackSnapshot;

    async fn decide(summary: Summary) -> Value {
        let feedback = FeedbackSnapshot::default();
        let req = DecisionRequest {
            summary: &summary,
            triages: &[],
            feedback: &feedback,
        };
        BaselineDecision::default().decide(&req).await.unwrap()
    }

    #[tokio::test]
    async fn quiet_run_turns_everything_off() {
        let v = decide(Summary::default()).await;
        let p = parse_decision(&v).unwrap();
        assert!(!p.jira_drafts.unwrap().run);
        assert!(!p.filter_suggestions.unwrap().run);
        let doc = p.confluence_draft.unwrap();
        assert!(!doc.run);
        assert!(!doc.carries_inputs());
    }

    #[tokio::test]
    async fn internal_high_enables_all() {
        let mut s = Summary {
            triaged_cluster_count: 3,
            internal_high_count: 1,
            ..Summary::default()
        };
        s.by_label.insert(Label::InternalError, 3);
        let p = parse_decision(&decide(s).await).unwrap();
        let jira = p.jira_drafts.unwrap();
        assert!(jira.run);
        assert_eq!(jira.max_tickets, Some(10));
        assert!(jira.cluster_indices.is_none());
        assert!(p.filter_suggestions.unwrap().run);
        let doc = p.confluence_draft.unwrap();
        assert!(doc.run);
        assert_eq!(doc.include_sections.unwrap().len(), 3);
        assert!(p.reason.unwrap().starts_with("baseline heuristics"));
    }
}
