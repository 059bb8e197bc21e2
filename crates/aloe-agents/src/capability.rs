//! Refinement, classification and decision capabilities backed by a
//! [`ChatModel`].

use std::sync::Arc;

use aloe_conductor::classify::{ClassifyRequest, Classifier};
use aloe_conductor::plan::decision::{DecisionRequest, DecisionSource};
use aloe_conductor::refine::{ClusterRefiner, RefineItem};
use aloe_core::AloeError;
use serde_json::{json, Value};

use crate::llm::{ChatModel, LlmError};
use crate::prompts::{DECISION_SYSTEM, REFINE_SYSTEM, TRIAGE_SYSTEM};

pub struct LlmClassifier {
    model: Arc<dyn ChatModel>,
}

impl LlmClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait::async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, req: &ClassifyRequest) -> Result<Value, AloeError> {
        let user = format!(
            "Cluster:\n{}",
            serde_json::to_string_pretty(req).map_err(AloeError::from)?
        );
        let out = self.model.ask_json(TRIAGE_SYSTEM, &user).await.map_err(|e| match e {
            LlmError::Unavailable(m) => AloeError::ClassificationUnavailable(m),
            other => AloeError::ClassificationSchemaInvalid(other.to_string()),
        })?;
        // Some models wrap the verdict in a "triage" object.
        Ok(match out.get("triage") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => out,
        })
    }
}

pub struct LlmRefiner {
    model: Arc<dyn ChatModel>,
}

impl LlmRefiner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait::async_trait]
impl ClusterRefiner for LlmRefiner {
    async fn group(&self, items: &[RefineItem]) -> Result<Value, AloeError> {
        let user = format!(
            "Clusters:\n{}",
            serde_json::to_string_pretty(items).map_err(AloeError::from)?
        );
        self.model
            .ask_json(REFINE_SYSTEM, &user)
            .await
            .map_err(|e| AloeError::RefinementFailed(e.to_string()))
    }
}

pub struct LlmDecision {
    model: Arc<dyn ChatModel>,
}

impl LlmDecision {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

/// Compact view of the run handed to the planner.
pub fn decision_payload(req: &DecisionRequest<'_>) -> Value {
    let clusters: Vec<Value> = req
        .triages
        .iter()
        .map(|t| {
            json!({
                "idx": t.cluster_index,
                "signature": t.cluster_signature,
                "service": t.extracted.service,
                "size": t.size,
                "status": t.status,
                "label": t.label(),
                "severity": t.severity(),
                "priority": t.priority(),
                "confidence": t.confidence(),
            })
        })
        .collect();
    json!({
        "summary": req.summary,
        "clusters": clusters,
        "feedback": req.feedback.digest(),
    })
}

#[async_trait::async_trait]
impl DecisionSource for LlmDecision {
    async fn decide(&self, req: &DecisionRequest<'_>) -> Result<Value, AloeError> {
        let user = format!(
            "Current log review state:\n{}\n\nDecide which agents to run.",
            serde_json::to_string_pretty(&decision_payload(req)).map_err(AloeError::from)?
        );
        self.model
            .ask_json(DECISION_SYSTEM, &user)
            .await
            .map_err(|e| match e {
                LlmError::Unavailable(m) => AloeError::DecisionUnavailable(m),
                other => AloeError::DecisionSchemaInvalid(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use aloe_core::{Cluster, Decision, FeedbackEntry, LogLevel, LogRecord, Severity, Summary, Triage, Verdict, Label};
    use aloe_ledger::FeedbackSnapshot;

    fn request() -> ClassifyRequest {
        ClassifyRequest {
            signature: "abc123".into(),
            cluster_index: 0,
            service: "billing".into(),
            class: "InvoiceService".into(),
            pattern: "invoice <*> failed".into(),
            representative: "invoice 42 failed".into(),
            level: LogLevel::Error,
            stack_excerpt: String::new(),
            count: 3,
        }
    }

    fn triage() -> Triage {
        let rec = LogRecord {
            service: "billing".into(),
            class: "InvoiceService".into(),
            message: "invoice 42 failed".into(),
            timestamp: time::OffsetDateTime::UNIX_EPOCH,
            level: LogLevel::Error,
            trace_id: None,
            stack: None,
        };
        let cluster = Cluster {
            signature: "abc123".into(),
            pattern: "invoice <*> failed".into(),
            service: "billing".into(),
            class: "InvoiceService".into(),
            members: vec![rec.clone()],
            representative: rec,
            size: 1,
            merged_from: Vec::new(),
        };
        Triage::ok(
            0,
            &cluster,
            Verdict {
                label: Label::InternalError,
                severity: Severity::High,
                priority: Severity::High,
                confidence: 0.9,
                reason: "npe".into(),
            },
        )
    }

    #[tokio::test]
    async fn classifier_unwraps_nested_triage() {
        let model = Arc::new(ScriptedModel::answering(json!({
            "triage": {"label": "noise", "severity": "low", "priority": "low", "confidence": 0.4}
        })));
        let c = LlmClassifier::new(model.clone());
        let out = c.classify(&request()).await.unwrap();
        assert_eq!(out["label"], "noise");
        assert!(model.prompts()[0].contains("invoice <*> failed"));
    }

    #[tokio::test]
    async fn classifier_maps_errors() {
        let c = LlmClassifier::new(Arc::new(ScriptedModel::new([Err("429".to_string())])));
        assert!(matches!(
            c.classify(&request()).await,
            Err(AloeError::ClassificationUnavailable(_))
        ));
        let c = LlmClassifier::new(Arc::new(ScriptedModel::new([])));
        assert!(matches!(
            c.classify(&request()).await,
            Err(AloeError::ClassificationSchemaInvalid(_))
        ));
    }

    #[tokio::test]
    async fn refiner_sends_compact_items() {
        let model = Arc::new(ScriptedModel::answering(json!({"groups": []})));
        let r = LlmRefiner::new(model.clone());
        let items = vec![RefineItem {
            idx: 0,
            service: "files".into(),
            class: "Uploader".into(),
            pattern: "upload of <*> failed".into(),
            message: "upload of a.pdf failed".into(),
            count: 4,
        }];
        assert_eq!(r.group(&items).await.unwrap(), json!({"groups": []}));
        assert!(model.prompts()[0].contains("upload of a.pdf failed"));

        let r = LlmRefiner::new(Arc::new(ScriptedModel::new([Err("503".to_string())])));
        assert!(matches!(r.group(&items).await, Err(AloeError::RefinementFailed(_))));
    }

    #[tokio::test]
    async fn decision_sees_triage_and_feedback() {
        let model = Arc::new(ScriptedModel::answering(json!({"reason": "quiet run"})));
        let d = LlmDecision::new(model.clone());
        let mut entry = FeedbackEntry::new("abc123", Decision::Rejected, "old");
        entry.label = Some(Label::InternalError);
        let feedback = FeedbackSnapshot::from_entries(vec![entry]);
        let triages = vec![triage()];
        let summary = Summary::default();
        let req = DecisionRequest {
            summary: &summary,
            triages: &triages,
            feedback: &feedback,
        };

        let payload = decision_payload(&req);
        assert_eq!(payload["clusters"][0]["signature"], "abc123");
        assert_eq!(payload["clusters"][0]["label"], "internal_error");
        assert_eq!(payload["feedback"][0]["decision"], "rejected");

        assert_eq!(d.decide(&req).await.unwrap()["reason"], "quiet run");
        assert!(model.prompts()[0].contains("abc123"));
    }

    #[tokio::test]
    async fn decision_errors_map_to_decision_kinds() {
        let d = LlmDecision::new(Arc::new(ScriptedModel::new([Err("503".to_string())])));
        let summary = Summary::default();
        let feedback = FeedbackSnapshot::default();
        let req = DecisionRequest {
            summary: &summary,
            triages: &[],
            feedback: &feedback,
        };
        assert!(matches!(d.decide(&req).await, Err(AloeError::DecisionUnavailable(_))));
    }
}
