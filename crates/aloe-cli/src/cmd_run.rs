use std::sync::Arc;
use std::time::Duration;

use aloe_agents::{
    ChatModel, ConfluenceAgent, ConfluenceClient, FilterAgent, JiraDraftAgent, LlmClassifier, LlmClient,
    LlmDecision, LlmRefiner,
};
use aloe_conductor::classify::adapter::ClassificationAdapter;
use aloe_conductor::pipeline::{Pipeline, RunReport};
use aloe_conductor::plan::baseline::BaselineDecision;
use aloe_conductor::plan::decision::DecisionSource;
use aloe_conductor::plan::engine::PlanEngine;
use aloe_conductor::refine::ClusterRefinement;
use aloe_conductor::runner::executor::{PlanExecutor, ResultStatus};
use aloe_core::cluster::ClusterEngine;
use aloe_core::config::{AloeConfig, PlanMode};
use aloe_core::normalize::Normalizer;
use aloe_ledger::{AloePaths, FeedbackStore, WorkspaceLock};
use aloe_store::RunStore;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::workspace::Workspace;

/// Execute `aloe run [--mode ..] [--json-events]`.
pub fn execute(ws: &Workspace, mode: Option<PlanMode>, json_events: bool) -> Result<()> {
    let _lock = WorkspaceLock::acquire(&ws.paths, "run")?;
    let mut cfg = ws.config.clone();
    if let Some(mode) = mode {
        cfg.plan.mode = mode;
    }

    let source = aloe_agents::source::from_config(&cfg.source)?;
    let pipeline = build_pipeline(&ws.paths, &cfg, json_events)?;

    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let raw = source.fetch().await.context("fetch logs")?;
        pipeline.run(raw, &source.describe(), cancel).await
    })?;

    print_report(&report);
    Ok(())
}

/// Assemble the pipeline from configuration. One reasoning client is shared
/// by every stage so its usage counters cover the whole run.
pub fn build_pipeline(paths: &AloePaths, cfg: &AloeConfig, json_events: bool) -> Result<Pipeline> {
    let llm = Arc::new(LlmClient::new(&cfg.llm)?);
    let usage = llm.usage();
    let model: Arc<dyn ChatModel> = llm;

    let decision: Arc<dyn DecisionSource> = match cfg.plan.mode {
        PlanMode::Orchestrator => Arc::new(LlmDecision::new(Arc::clone(&model))),
        PlanMode::Baseline => Arc::new(BaselineDecision::default()),
    };
    let refiner = cfg.refine.enabled.then(|| {
        ClusterRefinement::new(
            Arc::new(LlmRefiner::new(Arc::clone(&model))),
            Duration::from_secs(cfg.refine.timeout_sec),
        )
    });
    let publisher = Arc::new(ConfluenceClient::from_config(&cfg.confluence)?);
    let executor = PlanExecutor::new(cfg.actions.concurrency, Duration::from_secs(cfg.actions.timeout_sec))
        .register(Arc::new(JiraDraftAgent::new(Arc::clone(&model))))
        .register(Arc::new(FilterAgent::new(Arc::clone(&model))))
        .register(Arc::new(ConfluenceAgent::new(publisher).with_model(Arc::clone(&model))));

    Ok(Pipeline {
        normalizer: Normalizer::new(cfg.normalize.clone()),
        clusterer: ClusterEngine::from_config(&cfg.mask)?,
        refiner,
        adapter: ClassificationAdapter::new(Arc::new(LlmClassifier::new(Arc::clone(&model))), &cfg.classify),
        planner: PlanEngine::new(decision, Duration::from_secs(cfg.plan.timeout_sec)),
        executor,
        feedback: FeedbackStore::open(paths)?,
        runs: RunStore::new(paths.runs_dir.clone()),
        usage: Some(usage),
        json_events,
    })
}

fn print_report(report: &RunReport) {
    let m = &report.manifest;
    println!("Run {} ({})", report.run_id, m.source);
    println!(
        "  records:  {} kept, {} dropped",
        m.counts.log_count, m.counts.dropped_record_count
    );
    println!(
        "  clusters: {} ({} triaged, {} failed)",
        m.counts.cluster_count, m.counts.triaged_cluster_count, m.counts.failed_cluster_count
    );
    if m.counts.merged_cluster_count > 0 {
        println!("  refined:  {} clusters folded into others", m.counts.merged_cluster_count);
    }
    if let Some(stopped) = report.stopped() {
        println!("  stopped:  {stopped}");
    }
    if let Some(plan) = &report.plan {
        println!("  plan:     {} - {}", plan.source.as_str(), plan.reason);
    }
    for (name, r) in &report.results {
        let icon = match r.status {
            ResultStatus::Ok => "+",
            ResultStatus::Skipped => "-",
            ResultStatus::Failed => "x",
        };
        let detail = r.error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default();
        println!("  {icon} {name:<18} {:?} {}ms{detail}", r.status, r.duration_ms);
    }
    if !m.issues.is_empty() {
        println!("  issues:   {}", m.issues.len());
        for issue in m.issues.iter().take(10) {
            println!("    {:?} {}: {}", issue.kind, issue.subject, issue.message);
        }
    }
    if m.cancelled {
        println!("  cancelled; completed results were kept");
    }
    println!("  artifacts: {}", report.run_dir.display());
}

fn ctrlc_cancel(cancel: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || {
        cancel.cancel();
    }) {
        tracing::warn!(error = %e, "Ctrl-C handler not installed; the run cannot be cancelled");
    }
}
