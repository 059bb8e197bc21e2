//! One end-to-end run: normalize, cluster, refine, classify, summarize, plan,
//! execute.
//!
//! Every stage consumes the previous stage's full output. Artifacts are
//! written under `.aloe/runs/<run_id>/` as each stage finishes, so a run
//! stopped early or cancelled still leaves everything it produced.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use aloe_core::cluster::ClusterEngine;
use aloe_core::normalize::{NormalizedBatch, Normalizer};
use aloe_core::summary::summarize;
use aloe_core::{new_run_id, now_rfc3339, Cluster, Issue, Summary, Triage};
use aloe_ledger::FeedbackStore;
use aloe_store::{artifact, RunDir, RunStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::agent::external::UsageReporter;
use crate::agent::outputs::{JiraDraftsOutput, TicketDraft};
use crate::agent::ActionContext;
use crate::classify::adapter::ClassificationAdapter;
use crate::plan::decision::DecisionRequest;
use crate::plan::engine::PlanEngine;
use crate::plan::schema::{ActionPlan, AgentName, PlanSource};
use crate::refine::ClusterRefinement;
use crate::runner::event_log::{Event, EventLogger};
use crate::runner::executor::{ExecutionResult, PlanExecutor, ResultStatus};
use crate::state::machine::RunStatus;

pub const STOP_NO_LOGS: &str = "no_logs";
pub const STOP_CANCELLED: &str = "cancelled";

/// Normalized records and the clusters built from them.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub batch: NormalizedBatch,
    pub clusters: Vec<Cluster>,
}

/// Record counts kept in the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunCounts {
    pub raw_records: usize,
    pub log_count: usize,
    pub dropped_record_count: usize,
    pub cluster_count: usize,
    #[serde(default)]
    pub merged_cluster_count: usize,
    pub triaged_cluster_count: usize,
    pub failed_cluster_count: usize,
}

/// `manifest.json`: what a run did, when, and what went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub source: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub counts: RunCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_source: Option<PlanSource>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub usage: Value,
}

/// In-memory result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
    pub summary: Summary,
    pub triages: Vec<Triage>,
    pub plan: Option<ActionPlan>,
    pub results: BTreeMap<String, ExecutionResult>,
}

impl RunReport {
    pub fn stopped(&self) -> Option<&str> {
        self.manifest.stopped.as_deref()
    }
}

/// Wires every stage together. Fields are public so callers assemble the
/// pipeline from whichever capability implementations they have.
pub struct Pipeline {
    pub normalizer: Normalizer,
    pub clusterer: ClusterEngine,
    pub refiner: Option<ClusterRefinement>,
    pub adapter: ClassificationAdapter,
    pub planner: PlanEngine,
    pub executor: PlanExecutor,
    pub feedback: FeedbackStore,
    pub runs: RunStore,
    pub usage: Option<Arc<dyn UsageReporter>>,
    pub json_events: bool,
}

impl Pipeline {
    /// Normalize and cluster without calling any external capability.
    pub fn preprocess(&self, raw: &[Value]) -> Preprocessed {
        let batch = self.normalizer.normalize_batch(raw, OffsetDateTime::now_utc());
        let clusters = self.clusterer.cluster(batch.records.clone());
        Preprocessed { batch, clusters }
    }

    /// Run the full pipeline over `raw` records.
    ///
    /// Only persistence and feedback-store failures are errors; everything
    /// else is absorbed into the report.
    pub async fn run(&self, raw: Vec<Value>, source: &str, cancel: CancellationToken) -> Result<RunReport> {
        let run_id = new_run_id();
        let dir = self.runs.open_run(&run_id)?;
        let mut events =
            EventLogger::new(dir.artifact_path(artifact::EVENTS)).with_stdout_json(self.json_events);
        let mut manifest = RunManifest {
            run_id: run_id.clone(),
            source: source.to_string(),
            started_at: now_rfc3339(),
            finished_at: None,
            stopped: None,
            cancelled: false,
            status: None,
            counts: RunCounts {
                raw_records: raw.len(),
                ..RunCounts::default()
            },
            plan_source: None,
            issues: Vec::new(),
            usage: Value::Null,
        };
        events.record(Event::RunStart {
            run_id: run_id.clone(),
            source: source.to_string(),
        });
        tracing::info!(run_id = %run_id, source, records = raw.len(), "run started");

        // ── Normalize + cluster ──
        let pre = self.preprocess(&raw);
        drop(raw);
        let kept = pre.batch.records.len();
        let dropped = pre.batch.dropped.len();
        manifest.counts.log_count = kept;
        manifest.counts.dropped_record_count = dropped;
        manifest.issues.extend(pre.batch.issues());
        events.record(Event::RecordsNormalized { kept, dropped });

        let mut report = RunReport {
            run_id: run_id.clone(),
            run_dir: dir.path.clone(),
            manifest,
            summary: summarize(kept, dropped, &[]),
            triages: Vec::new(),
            plan: None,
            results: BTreeMap::new(),
        };

        if kept == 0 {
            tracing::info!(run_id = %run_id, dropped, "no usable records; stopping");
            dir.save(artifact::SUMMARY, &report.summary)?;
            return self.finish(&dir, &mut events, report, Some(STOP_NO_LOGS));
        }

        let mut clusters = pre.clusters;
        if let Some(refiner) = self.refiner.as_ref().filter(|_| !cancel.is_cancelled()) {
            let before = clusters.len();
            let refined = refiner.refine(clusters).await;
            report.manifest.issues.extend(refined.issue);
            report.manifest.counts.merged_cluster_count = refined.merged;
            clusters = refined.clusters;
            if refined.merged > 0 {
                events.record(Event::ClustersRefined {
                    before,
                    after: clusters.len(),
                });
            }
        }
        report.manifest.counts.cluster_count = clusters.len();
        dir.save(artifact::CLUSTERS, &clusters)?;
        events.record(Event::ClustersBuilt {
            cluster_count: clusters.len(),
        });
        tracing::info!(run_id = %run_id, clusters = clusters.len(), "clusters built");

        if cancel.is_cancelled() {
            return self.finish(&dir, &mut events, report, Some(STOP_CANCELLED));
        }

        // ── Classify + summarize ──
        let triage = self.adapter.triage_all(&clusters, &cancel).await;
        for t in triage.failed() {
            events.record(Event::TriageFailed {
                signature: t.cluster_signature.clone(),
                error: t.error.clone().unwrap_or_default(),
            });
        }
        report.manifest.issues.extend(triage.issues);
        let triages = triage.triages;
        dir.save(artifact::TRIAGE, &triages)?;

        let summary = summarize(kept, dropped, &triages);
        dir.save(artifact::SUMMARY, &summary)?;
        report.manifest.counts.triaged_cluster_count = summary.triaged_cluster_count;
        report.manifest.counts.failed_cluster_count = summary.failed_cluster_count;
        events.record(Event::TriageCompleted {
            ok: summary.triaged_cluster_count,
            failed: summary.failed_cluster_count,
        });
        report.summary = summary.clone();
        report.triages = triages.clone();

        if cancel.is_cancelled() {
            return self.finish(&dir, &mut events, report, Some(STOP_CANCELLED));
        }

        // ── Plan ──
        let feedback = self.feedback.snapshot().context("read feedback store")?;
        let plan = self
            .planner
            .plan(&DecisionRequest {
                summary: &summary,
                triages: &triages,
                feedback: &feedback,
            })
            .await;
        dir.save(artifact::PLAN, &plan)?;
        report.manifest.plan_source = Some(plan.source);
        events.record(Event::PlanReady {
            source: plan.source.as_str().to_string(),
            reason: plan.reason.clone(),
            runnable: plan.runnable().map(|a| a.agent.as_str().to_string()).collect(),
        });
        tracing::info!(
            run_id = %run_id,
            source = plan.source.as_str(),
            runnable = plan.runnable().count(),
            "plan ready"
        );

        // ── Execute ──
        let ctx = Arc::new(ActionContext {
            run_id: run_id.clone(),
            clusters,
            triages,
            summary,
        });
        let execution = self.executor.execute(&plan, ctx, &mut events, cancel).await;
        dir.save(artifact::RESULTS, &execution.results)?;

        report.manifest.status = Some(execution.state.status);
        report.manifest.cancelled = execution.cancelled();
        report.plan = Some(plan);
        report.results = execution.results;
        self.finish(&dir, &mut events, report, None)
    }

    fn finish(
        &self,
        dir: &RunDir,
        events: &mut EventLogger,
        mut report: RunReport,
        stopped: Option<&str>,
    ) -> Result<RunReport> {
        if let Some(reason) = stopped {
            report.manifest.stopped = Some(reason.to_string());
            report.manifest.cancelled |= reason == STOP_CANCELLED;
            events.record(Event::RunStopped {
                reason: reason.to_string(),
            });
        }
        report.manifest.finished_at = Some(now_rfc3339());
        if let Some(usage) = &self.usage {
            report.manifest.usage = usage.usage();
        }
        dir.save(artifact::MANIFEST, &report.manifest)?;
        tracing::info!(
            run_id = %report.run_id,
            stopped = ?report.manifest.stopped,
            issues = report.manifest.issues.len(),
            "run finished"
        );
        Ok(report)
    }
}

/// Ticket drafts produced by a finished run, if its drafting action succeeded.
pub fn load_drafts(dir: &RunDir) -> Result<Vec<TicketDraft>> {
    let results: Option<BTreeMap<String, ExecutionResult>> = dir.load(artifact::RESULTS)?;
    let Some(result) = results.and_then(|mut r| r.remove(AgentName::JiraDrafts.as_str())) else {
        return Ok(Vec::new());
    };
    if result.status != ResultStatus::Ok {
        return Ok(Vec::new());
    }
    let output: JiraDraftsOutput = serde_json::from_value(result.output)
        .with_context(|| format!("decode ticket drafts of {}", dir.run_id))?;
    Ok(output.drafts)
}

/// Triages of a finished run; empty when the run stopped before triage.
pub fn load_triages(dir: &RunDir) -> Result<Vec<Triage>> {
    Ok(dir.load(artifact::TRIAGE)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{MockAgent, MockBehavior};
    use crate::classify::{MockClassifier, MockReply};
    use crate::plan::decision::MockDecision;
    use crate::refine::MockRefiner;
    use aloe_core::config::{ClassifyConfig, FieldAliases, MaskConfig};
    use serde_json::json;
    use std::time::Duration;

    fn pipeline(root: &std::path::Path, decision: Value, jira: MockBehavior) -> Pipeline {
        let classifier = Arc::new(MockClassifier::new(MockReply::Respond(json!({
            "label": "internal_error", "severity": "high", "priority": "high", "confidence": 0.9
        }))));
        Pipeline {
            normalizer: Normalizer::new(FieldAliases::default()),
            clusterer: ClusterEngine::from_config(&MaskConfig::default()).unwrap(),
            refiner: None,
            adapter: ClassificationAdapter::new(classifier, &ClassifyConfig::default()),
            planner: PlanEngine::new(Arc::new(MockDecision::returning(decision)), Duration::from_secs(5)),
            executor: PlanExecutor::new(3, Duration::from_secs(5))
                .register(Arc::new(MockAgent::new(AgentName::JiraDrafts, jira))),
            feedback: FeedbackStore::at(&root.join("feedback.jsonl"), &root.join("LOCK")),
            runs: RunStore::new(root.join("runs")),
            usage: None,
            json_events: false,
        }
    }

    fn records() -> Vec<Value> {
        vec![
            json!({"service": "billing", "class": "Svc", "message": "user 17 not found"}),
            json!({"service": "billing", "class": "Svc", "message": "user 42 not found"}),
            json!({"service": "auth", "class": "Login", "message": "token expired"}),
            json!({"level": "error"}),
        ]
    }

    #[tokio::test]
    async fn persists_every_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(
            tmp.path(),
            json!({"JiraDrafts": {"run": true}, "reason": "errors present"}),
            MockBehavior::Succeed(json!({"drafts": []})),
        );
        let report = p.run(records(), "test", CancellationToken::new()).await.unwrap();

        assert_eq!(report.stopped(), None);
        assert_eq!(report.manifest.counts.raw_records, 4);
        assert_eq!(report.manifest.counts.dropped_record_count, 1);
        assert_eq!(report.summary.cluster_count, 2);
        assert_eq!(report.manifest.issues.len(), 1);
        assert_eq!(report.manifest.issues[0].subject, "record[3]");
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results["JiraDrafts"].status, ResultStatus::Ok);

        for name in [
            artifact::CLUSTERS,
            artifact::TRIAGE,
            artifact::SUMMARY,
            artifact::PLAN,
            artifact::RESULTS,
            artifact::MANIFEST,
            artifact::EVENTS,
        ] {
            assert!(report.run_dir.join(name).exists(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn empty_input_stops_with_no_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), json!({}), MockBehavior::Succeed(json!({})));
        let report = p.run(vec![json!({"level": "info"})], "test", CancellationToken::new()).await.unwrap();
        assert_eq!(report.stopped(), Some(STOP_NO_LOGS));
        assert!(report.plan.is_none());
        assert!(report.run_dir.join(artifact::MANIFEST).exists());
        assert!(!report.run_dir.join(artifact::PLAN).exists());
    }

    #[tokio::test]
    async fn cancelled_before_classification_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), json!({}), MockBehavior::Succeed(json!({})));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = p.run(records(), "test", cancel).await.unwrap();
        assert_eq!(report.stopped(), Some(STOP_CANCELLED));
        assert!(report.manifest.cancelled);
        assert!(report.run_dir.join(artifact::CLUSTERS).exists());
        assert!(!report.run_dir.join(artifact::TRIAGE).exists());
    }

    #[tokio::test]
    async fn refined_clusters_feed_classification() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(
            tmp.path(),
            json!({"JiraDrafts": {"run": false}, "reason": "r"}),
            MockBehavior::Succeed(json!({})),
        );
        p.refiner = Some(ClusterRefinement::new(
            Arc::new(MockRefiner::returning(json!({
                "groups": [{"canonical_idx": 0, "member_idxs": [0, 1]}]
            }))),
            Duration::from_secs(5),
        ));
        let report = p.run(records(), "test", CancellationToken::new()).await.unwrap();

        assert_eq!(report.manifest.counts.cluster_count, 1);
        assert_eq!(report.manifest.counts.merged_cluster_count, 1);
        assert_eq!(report.triages.len(), 1);
        assert_eq!(report.triages[0].size, 3);
        let saved: Vec<Cluster> = p.runs.get(&report.run_id).unwrap().load(artifact::CLUSTERS).unwrap().unwrap();
        assert_eq!(saved[0].merged_from.len(), 1);
    }

    #[tokio::test]
    async fn refiner_failure_keeps_built_clusters() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(
            tmp.path(),
            json!({"JiraDrafts": {"run": false}, "reason": "r"}),
            MockBehavior::Succeed(json!({})),
        );
        p.refiner = Some(ClusterRefinement::new(
            Arc::new(MockRefiner::failing("503")),
            Duration::from_secs(5),
        ));
        let report = p.run(records(), "test", CancellationToken::new()).await.unwrap();

        assert_eq!(report.stopped(), None);
        assert_eq!(report.manifest.counts.cluster_count, 2);
        assert_eq!(report.manifest.counts.merged_cluster_count, 0);
        assert!(report
            .manifest
            .issues
            .iter()
            .any(|i| i.kind == aloe_core::ErrorKind::RefinementFailed));
    }

    #[tokio::test]
    async fn drafts_reload_from_results() {
        let tmp = tempfile::tempdir().unwrap();
        let draft = json!({
            "cluster_index": 0, "cluster_signature": "sig", "service": "billing",
            "summary": "s", "description": "d", "hits": 2
        });
        let p = pipeline(
            tmp.path(),
            json!({"JiraDrafts": {"run": true}, "reason": "r"}),
            MockBehavior::Succeed(json!({"drafts": [draft]})),
        );
        let report = p.run(records(), "test", CancellationToken::new()).await.unwrap();
        let dir = p.runs.get(&report.run_id).unwrap();
        let drafts = load_drafts(&dir).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].cluster_signature, "sig");
        assert_eq!(load_triages(&dir).unwrap().len(), 2);
    }
}
