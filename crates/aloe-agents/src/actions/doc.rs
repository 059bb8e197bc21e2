//! ConfluenceDraft: a short markdown report of the run, then publishing.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use aloe_conductor::agent::external::DocPublisher;
use aloe_conductor::agent::outputs::{DocDraftOutput, FilterSuggestionsOutput, JiraDraftsOutput};
use aloe_conductor::agent::{ActionAgent, ActionContext, ActionRequest};
use aloe_conductor::plan::schema::{AgentName, Section};
use aloe_core::AloeError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::ChatModel;
use crate::prompts::DOC_SYSTEM;

const MAX_ROWS: usize = 10;
const CELL_CHARS: usize = 90;

pub struct ConfluenceAgent {
    /// Optional tidy-up pass over the rendered markdown.
    model: Option<Arc<dyn ChatModel>>,
    publisher: Arc<dyn DocPublisher>,
}

impl ConfluenceAgent {
    pub fn new(publisher: Arc<dyn DocPublisher>) -> Self {
        Self {
            model: None,
            publisher,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }
}

fn upstream<T: DeserializeOwned>(req: &ActionRequest, agent: AgentName) -> Option<T> {
    let v = req.upstream.get(&agent)?;
    match serde_json::from_value(v.clone()) {
        Ok(out) => Some(out),
        Err(e) => {
            tracing::warn!(agent = agent.as_str(), error = %e, "ignoring unreadable upstream output");
            None
        }
    }
}

fn cell(text: &str) -> String {
    let flat: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|");
    if flat.chars().count() > CELL_CHARS {
        let cut: String = flat.chars().take(CELL_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

/// Human-readable form of an exclusion clause.
pub fn describe_clause(clause: &Value) -> String {
    let phrase = |c: &Value| {
        c.pointer("/match_phrase/log")
            .and_then(Value::as_str)
            .map(|p| format!("log:\"{p}\""))
    };
    if let Some(p) = phrase(clause) {
        return p;
    }
    clause
        .pointer("/bool/must")
        .and_then(Value::as_array)
        .map(|parts| parts.iter().filter_map(phrase).collect::<Vec<_>>().join(" and "))
        .unwrap_or_else(|| clause.to_string())
}

/// Render the report. An empty section list means every section.
pub fn render_report(
    ctx: &ActionContext,
    sections: &[Section],
    drafts: Option<&JiraDraftsOutput>,
    filters: Option<&FilterSuggestionsOutput>,
) -> String {
    let wants = |s: Section| sections.is_empty() || sections.contains(&s);
    let drafts = drafts.filter(|_| wants(Section::JiraLinks));
    let filters = filters.filter(|_| wants(Section::Filters));
    let mut md = String::new();
    let _ = writeln!(md, "# Log review {}\n", ctx.run_id);

    if wants(Section::Summary) {
        let s = &ctx.summary;
        let labels = s
            .by_label
            .iter()
            .map(|(label, n)| format!("{} {n}", label.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            md,
            "**Summary:** {} records, {} clusters ({} triaged, {} failed).",
            s.log_count, s.cluster_count, s.triaged_cluster_count, s.failed_cluster_count
        );
        if !labels.is_empty() {
            let _ = writeln!(md, "Labels: {labels}.");
        }
        md.push('\n');
    }

    let mut rows: BTreeSet<usize> = BTreeSet::new();
    if let Some(d) = drafts {
        rows.extend(d.drafts.iter().map(|d| d.cluster_index));
    }
    if let Some(f) = filters {
        rows.extend(f.filters.iter().map(|f| f.cluster_index));
    }
    if rows.is_empty() {
        rows.extend(ctx.triages.iter().filter(|t| t.is_ok()).map(|t| t.cluster_index));
    }

    let mut header = vec!["Service", "Error summary"];
    if drafts.is_some() {
        header.push("Ticket draft");
    }
    if filters.is_some() {
        header.push("Exclusion filter");
    }
    header.push("Count");
    let _ = writeln!(md, "| {} |", header.join(" | "));
    let _ = writeln!(md, "|{}", "---|".repeat(header.len()));

    for idx in rows.iter().take(MAX_ROWS) {
        let Some(cluster) = ctx.clusters.get(*idx) else {
            continue;
        };
        let draft = drafts.and_then(|d| d.drafts.iter().find(|d| d.cluster_index == *idx));
        let filter = filters.and_then(|f| f.filters.iter().find(|f| f.cluster_index == *idx));
        let mut cols = vec![cell(&cluster.service), cell(&cluster.pattern)];
        if drafts.is_some() {
            cols.push(draft.map(|d| cell(&d.summary)).unwrap_or_else(|| "-".into()));
        }
        if filters.is_some() {
            cols.push(
                filter
                    .map(|f| format!("`{}`", cell(&describe_clause(&f.es_filter_clause))))
                    .unwrap_or_else(|| "-".into()),
            );
        }
        cols.push(cluster.size.to_string());
        let _ = writeln!(md, "| {} |", cols.join(" | "));
    }
    if rows.len() > MAX_ROWS {
        let _ = writeln!(md, "\n_{} more clusters not shown._", rows.len() - MAX_ROWS);
    }
    md
}

#[async_trait::async_trait]
impl ActionAgent for ConfluenceAgent {
    fn name(&self) -> AgentName {
        AgentName::ConfluenceDraft
    }

    async fn run(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
        cancel: CancellationToken,
    ) -> Result<Value, AloeError> {
        let drafts: Option<JiraDraftsOutput> = upstream(req, AgentName::JiraDrafts);
        let filters: Option<FilterSuggestionsOutput> = upstream(req, AgentName::FilterSuggestions);
        let mut markdown = render_report(
            ctx,
            &req.spec.scoped_inputs.include_sections,
            drafts.as_ref(),
            filters.as_ref(),
        );

        if let Some(model) = &self.model {
            match model.ask_json(DOC_SYSTEM, &markdown).await {
                Ok(out) => {
                    if let Some(md) = out
                        .get("markdown")
                        .and_then(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                    {
                        markdown = md.to_string();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "report rewrite failed, keeping rendered markdown"),
            }
        }

        if cancel.is_cancelled() {
            return Err(AloeError::action_failed(self.name().as_str(), "cancelled"));
        }

        let title = format!("Log review {}", ctx.run_id);
        let (published, publish_error) = match self.publisher.publish(&title, &markdown).await {
            Ok(reference) => (Some(reference), None),
            Err(e) => {
                tracing::warn!(error = %e, "publishing the report failed");
                (None, Some(e.to_string()))
            }
        };
        Ok(serde_json::to_value(DocDraftOutput {
            title,
            markdown,
            published,
            publish_error,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::fixtures::{context, request};
    use crate::llm::ScriptedModel;
    use aloe_conductor::agent::external::CollectPages;
    use aloe_conductor::agent::outputs::{FilterSuggestion, TicketDraft};
    use aloe_conductor::plan::schema::ScopedInputs;
    use serde_json::json;

    struct BrokenPublisher;

    #[async_trait::async_trait]
    impl DocPublisher for BrokenPublisher {
        async fn publish(&self, _title: &str, _markdown: &str) -> Result<String, AloeError> {
            Err(AloeError::action_failed("publish", "page locked"))
        }
    }

    fn drafts() -> JiraDraftsOutput {
        JiraDraftsOutput {
            drafts: vec![TicketDraft {
                cluster_index: 0,
                cluster_signature: "sig00".into(),
                service: "checkout".into(),
                label: None,
                severity: None,
                summary: "Checkout | pay fails".into(),
                description: "d".into(),
                kql_filter: String::new(),
                hits: 10,
                stack_excerpt: String::new(),
                notes: vec![],
                repro_steps: vec![],
            }],
            skipped: vec![],
        }
    }

    fn filters() -> FilterSuggestionsOutput {
        FilterSuggestionsOutput {
            filters: vec![FilterSuggestion {
                cluster_index: 3,
                cluster_signature: "sig03".into(),
                label: None,
                es_filter_clause: json!({"bool": {"must": [
                    {"match_phrase": {"log": "payment"}},
                    {"match_phrase": {"log": "rejected"}}
                ]}}),
                rationale: String::new(),
            }],
            skipped: vec![],
        }
    }

    #[test]
    fn report_has_one_row_per_handled_cluster() {
        let ctx = context(5);
        let md = render_report(&ctx, &Section::ALL, Some(&drafts()), Some(&filters()));
        assert!(md.starts_with("# Log review run-1"));
        assert!(md.contains("**Summary:** "));
        assert!(md.contains("| Service | Error summary | Ticket draft | Exclusion filter | Count |"));
        assert!(md.contains("Checkout \\| pay fails"));
        assert!(md.contains("`log:\"payment\" and log:\"rejected\"`"));
        let rows = md.lines().filter(|l| l.starts_with("| checkout")).count();
        assert_eq!(rows, 2);
    }

    #[test]
    fn excluded_sections_drop_their_columns() {
        let ctx = context(3);
        let md = render_report(&ctx, &[Section::Summary], Some(&drafts()), Some(&filters()));
        assert!(!md.contains("Ticket draft"));
        assert!(!md.contains("Exclusion filter"));
        // Without drafts or filters every triaged cluster is listed.
        assert_eq!(md.lines().filter(|l| l.starts_with("| checkout")).count(), 3);
    }

    #[test]
    fn long_reports_are_capped() {
        let ctx = context(14);
        let md = render_report(&ctx, &[], None, None);
        assert_eq!(md.lines().filter(|l| l.starts_with("| checkout")).count(), MAX_ROWS);
        assert!(md.contains("_4 more clusters not shown._"));
    }

    #[tokio::test]
    async fn publishes_with_upstream_outputs() {
        let pages = Arc::new(CollectPages::default());
        let agent = ConfluenceAgent::new(pages.clone());
        let mut req = request(AgentName::ConfluenceDraft, ScopedInputs::default());
        req.upstream
            .insert(AgentName::JiraDrafts, serde_json::to_value(drafts()).unwrap());
        let ctx = context(2);

        let v = agent.run(&req, &ctx, CancellationToken::new()).await.unwrap();
        let out: DocDraftOutput = serde_json::from_value(v).unwrap();
        assert_eq!(out.title, "Log review run-1");
        assert_eq!(out.published.as_deref(), Some("page-1"));
        assert_eq!(pages.pages()[0].1, out.markdown);
        assert!(out.markdown.contains("Checkout \\| pay fails"));
    }

    #[tokio::test]
    async fn model_rewrite_is_used_when_present() {
        let pages = Arc::new(CollectPages::default());
        let model = Arc::new(ScriptedModel::answering(json!({"markdown": "# tidy"})));
        let agent = ConfluenceAgent::new(pages).with_model(model);
        let ctx = context(1);
        let v = agent
            .run(&request(AgentName::ConfluenceDraft, ScopedInputs::default()), &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v["markdown"], "# tidy");

        let pages = Arc::new(CollectPages::default());
        let model = Arc::new(ScriptedModel::new([Err("503".to_string())]));
        let agent = ConfluenceAgent::new(pages).with_model(model);
        let v = agent
            .run(&request(AgentName::ConfluenceDraft, ScopedInputs::default()), &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert!(v["markdown"].as_str().unwrap().starts_with("# Log review"));
    }

    #[tokio::test]
    async fn publish_failure_is_recorded_not_raised() {
        let agent = ConfluenceAgent::new(Arc::new(BrokenPublisher));
        let ctx = context(1);
        let v = agent
            .run(&request(AgentName::ConfluenceDraft, ScopedInputs::default()), &ctx, CancellationToken::new())
            .await
            .unwrap();
        let out: DocDraftOutput = serde_json::from_value(v).unwrap();
        assert!(out.published.is_none());
        assert!(out.publish_error.unwrap().contains("page locked"));
    }
}
