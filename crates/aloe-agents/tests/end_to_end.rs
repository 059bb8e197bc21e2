use std::sync::Arc;
use std::time::Duration;

use aloe_agents::prompts::{DECISION_SYSTEM, DOC_SYSTEM, FILTER_SYSTEM, JIRA_SYSTEM, REFINE_SYSTEM, TRIAGE_SYSTEM};
use aloe_agents::{
    ChatModel, ConfluenceAgent, FilterAgent, JiraDraftAgent, LlmClassifier, LlmDecision, LlmError, LlmRefiner,
};
use aloe_conductor::agent::external::{CollectPages, CollectTickets};
use aloe_conductor::agent::outputs::{DocDraftOutput, FilterSuggestionsOutput};
use aloe_conductor::classify::adapter::ClassificationAdapter;
use aloe_conductor::pipeline::{load_drafts, load_triages, Pipeline};
use aloe_conductor::plan::engine::PlanEngine;
use aloe_conductor::plan::schema::{AgentName, PlanSource};
use aloe_conductor::refine::ClusterRefinement;
use aloe_conductor::review::{review_drafts, ReviewChoice, ScriptedPrompt};
use aloe_conductor::runner::executor::{PlanExecutor, ResultStatus};
use aloe_core::cluster::ClusterEngine;
use aloe_core::config::{ClassifyConfig, FieldAliases, MaskConfig};
use aloe_core::normalize::Normalizer;
use aloe_core::Decision;
use aloe_ledger::FeedbackStore;
use aloe_store::{RunDir, RunStore};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Answers each prompt kind the way a well-behaved service would.
struct Router;

fn payload(user: &str) -> Value {
    let body = user.split_once('\n').map(|(_, rest)| rest).unwrap_or(user);
    serde_json::from_str(body).unwrap_or(Value::Null)
}

#[async_trait::async_trait]
impl ChatModel for Router {
    async fn ask_json(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        if system == TRIAGE_SYSTEM {
            let req = payload(user);
            let failing = req["pattern"].as_str().unwrap_or_default().contains("failed");
            return Ok(if failing {
                json!({"label": "internal_error", "severity": "high", "priority": "high", "confidence": 0.9, "reason": "payment path"})
            } else {
                json!({"label": "noise", "severity": "low", "priority": "low", "confidence": 0.8, "reason": "cache chatter"})
            });
        }
        if system == DECISION_SYSTEM {
            return Ok(json!({
                "actions": [
                    {"agent": "JiraDrafts", "run": true},
                    {"agent": "FilterSuggestions", "run": true},
                    {"agent": "ConfluenceDraft", "run": true}
                ],
                "reason": "one real failure and some noise"
            }));
        }
        let clusters = payload(user);
        let clusters = clusters.as_array().cloned().unwrap_or_default();
        if system == REFINE_SYSTEM {
            let groups: Vec<Value> = clusters
                .iter()
                .map(|c| json!({"canonical_idx": c["idx"], "member_idxs": [c["idx"]]}))
                .collect();
            return Ok(json!({"groups": groups}));
        }
        if system == JIRA_SYSTEM {
            let items: Vec<Value> = clusters
                .iter()
                .map(|c| json!({"idx": c["idx"], "summary": format!("Fix: {}", c["pattern"].as_str().unwrap_or_default())}))
                .collect();
            return Ok(json!({"items": items}));
        }
        if system == FILTER_SYSTEM {
            let items: Vec<Value> = clusters
                .iter()
                .map(|c| json!({"idx": c["idx"], "es_filter_clause": {"match_phrase": {"log": "cache miss for key"}}, "rationale": "noise"}))
                .collect();
            return Ok(json!({"items": items}));
        }
        if system == DOC_SYSTEM {
            return Ok(json!({"markdown": ""}));
        }
        Err(LlmError::Rejected("unknown prompt".into()))
    }
}

fn raw_records() -> Vec<Value> {
    (0..12)
        .map(|i| {
            let message = if i % 3 == 0 {
                format!("payment failed for order {}", 5000 + i)
            } else {
                format!("cache miss for key user:{i}")
            };
            json!({
                "@timestamp": format!("2024-05-01T10:{:02}:00Z", i),
                "athena_level": "ERROR",
                "AthenaServiceName": "checkout",
                "athena_java_class": "com.shop.Checkout",
                "athena_message": message,
            })
        })
        .collect()
}

fn pipeline(root: &std::path::Path, pages: Arc<CollectPages>) -> Pipeline {
    let model: Arc<dyn ChatModel> = Arc::new(Router);
    let executor = PlanExecutor::new(3, Duration::from_secs(10))
        .register(Arc::new(JiraDraftAgent::new(Arc::clone(&model))))
        .register(Arc::new(FilterAgent::new(Arc::clone(&model))))
        .register(Arc::new(ConfluenceAgent::new(pages).with_model(Arc::clone(&model))));
    Pipeline {
        normalizer: Normalizer::new(FieldAliases::default()),
        clusterer: ClusterEngine::from_config(&MaskConfig::default()).unwrap(),
        refiner: Some(ClusterRefinement::new(
            Arc::new(LlmRefiner::new(Arc::clone(&model))),
            Duration::from_secs(10),
        )),
        adapter: ClassificationAdapter::new(
            Arc::new(LlmClassifier::new(Arc::clone(&model))),
            &ClassifyConfig::default(),
        ),
        planner: PlanEngine::new(Arc::new(LlmDecision::new(model)), Duration::from_secs(10)),
        executor,
        feedback: FeedbackStore::at(&root.join("feedback.jsonl"), &root.join("LOCK")),
        runs: RunStore::new(root.join("runs")),
        usage: None,
        json_events: false,
    }
}

#[tokio::test]
async fn run_then_review() {
    let tmp = tempfile::tempdir().unwrap();
    let pages = Arc::new(CollectPages::default());
    let p = pipeline(tmp.path(), Arc::clone(&pages));
    let report = p.run(raw_records(), "fixture", CancellationToken::new()).await.unwrap();

    assert_eq!(report.summary.cluster_count, 2);
    assert_eq!(report.manifest.counts.merged_cluster_count, 0);
    assert_eq!(report.summary.internal_high_count, 1);
    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.source, PlanSource::Decision);
    assert!(report.results.values().all(|r| r.status == ResultStatus::Ok));

    let filters: FilterSuggestionsOutput =
        serde_json::from_value(report.results[AgentName::FilterSuggestions.as_str()].output.clone()).unwrap();
    assert_eq!(filters.filters.len(), 1);
    assert_eq!(filters.filters[0].es_filter_clause["match_phrase"]["log"], "cache miss for key");

    let doc: DocDraftOutput =
        serde_json::from_value(report.results[AgentName::ConfluenceDraft.as_str()].output.clone()).unwrap();
    assert_eq!(doc.published.as_deref(), Some("page-1"));
    assert!(doc.markdown.contains("Fix: payment failed for order <*>"));
    assert!(doc.markdown.contains("log:\"cache miss for key\""));
    assert_eq!(pages.pages().len(), 1);

    // Review the drafts the run left behind.
    let dir = RunDir {
        run_id: report.run_id.clone(),
        path: report.run_dir.clone(),
    };
    let drafts = load_drafts(&dir).unwrap();
    assert_eq!(drafts.len(), 1);
    let triages = load_triages(&dir).unwrap();
    let tickets = CollectTickets::new();
    let mut prompt = ScriptedPrompt::new([ReviewChoice::Approve]);
    let outcome = review_drafts(&report.run_id, &drafts, &triages, &mut prompt, &p.feedback, &tickets)
        .await
        .unwrap();
    assert_eq!(outcome.approved, 1);
    assert_eq!(outcome.created[0].key, "MOCK-1");

    let latest = p.feedback.latest(&drafts[0].cluster_signature).unwrap().unwrap();
    assert_eq!(latest.decision, Decision::Approved);
    assert_eq!(latest.source.as_deref(), Some(format!("review:{}", report.run_id).as_str()));
}
