use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use aloe_core::{Label, Severity, Triage};

use crate::plan::decision::{DecisionRequest, DecisionSource};
use crate::plan::parser::{parse_decision, RawAction, RawPlan};
use crate::plan::schema::{
    ActionPlan, ActionSpec, AgentName, PlanSource, ScopedInputs, Section, DEFAULT_FILTER_LABELS,
};

/// Single decision point per run.
///
/// Asks the decision source once, then turns whatever came back into a
/// total, consistent plan. Never fails: an unusable decision becomes the
/// fallback plan.
pub struct PlanEngine {
    source: Arc<dyn DecisionSource>,
    timeout: Duration,
}

impl PlanEngine {
    pub fn new(source: Arc<dyn DecisionSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn plan(&self, req: &DecisionRequest<'_>) -> ActionPlan {
        let raw = match tokio::time::timeout(self.timeout, self.source.decide(req)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "decision source failed; using fallback plan");
                return ActionPlan::fallback(e.to_string());
            }
            Err(_) => {
                tracing::warn!(timeout_sec = self.timeout.as_secs(), "decision timed out");
                return ActionPlan::fallback(format!(
                    "decision unavailable: timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };
        match parse_decision(&raw) {
            Ok(parsed) => enforce(parsed, req, self.source.kind()),
            Err(e) => {
                tracing::warn!(error = %e, "decision rejected; using fallback plan");
                ActionPlan::fallback(e.to_string())
            }
        }
    }
}

/// Apply totality, consistency and feedback rules to a parsed decision.
pub fn enforce(raw: RawPlan, req: &DecisionRequest<'_>, source: PlanSource) -> ActionPlan {
    let by_index: HashMap<usize, &Triage> =
        req.triages.iter().map(|t| (t.cluster_index, t)).collect();
    let mut notes = Vec::new();
    let mut actions = Vec::with_capacity(AgentName::ALL.len());

    for agent in AgentName::ALL {
        let spec = match raw.action(agent) {
            None => {
                notes.push(format!("{agent}: missing from decision, set run=false"));
                ActionSpec::off(agent)
            }
            Some(a) if !a.run => {
                if a.carries_inputs() {
                    notes.push(format!("{agent}: run=false, scoped inputs cleared"));
                }
                ActionSpec::off(agent)
            }
            Some(a) => match agent {
                AgentName::JiraDrafts => jira_spec(a, req, &by_index, &mut notes),
                AgentName::FilterSuggestions => filter_spec(a, req, &mut notes),
                AgentName::ConfluenceDraft => doc_spec(a),
            },
        };
        actions.push(spec);
    }

    // Documentation cannot link to work that is not happening.
    let jira_on = actions.iter().any(|a| a.agent == AgentName::JiraDrafts && a.run);
    let filters_on = actions
        .iter()
        .any(|a| a.agent == AgentName::FilterSuggestions && a.run);
    if let Some(doc) = actions
        .iter_mut()
        .find(|a| a.agent == AgentName::ConfluenceDraft && a.run)
    {
        let sections = &mut doc.scoped_inputs.include_sections;
        if !jira_on && sections.contains(&Section::JiraLinks) {
            sections.retain(|s| *s != Section::JiraLinks);
            notes.push("ConfluenceDraft: jira_links dropped, JiraDrafts not running".into());
        }
        if !filters_on && sections.contains(&Section::Filters) {
            sections.retain(|s| *s != Section::Filters);
            notes.push("ConfluenceDraft: filters dropped, FilterSuggestions not running".into());
        }
        if sections.is_empty() {
            sections.push(Section::Summary);
        }
    }

    let reason = raw
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "decision gave no reason".to_string());

    for n in &notes {
        tracing::debug!(adjustment = %n, "plan adjusted");
    }

    ActionPlan {
        actions,
        global_policy: raw.global_policy.unwrap_or_default(),
        reason,
        source,
        adjustments: notes,
    }
}

fn jira_spec(
    a: &RawAction,
    req: &DecisionRequest<'_>,
    by_index: &HashMap<usize, &Triage>,
    notes: &mut Vec<String>,
) -> ActionSpec {
    let agent = AgentName::JiraDrafts;
    let candidates: BTreeSet<usize> = match &a.cluster_indices {
        Some(list) => list.iter().copied().collect(),
        None => req
            .triages
            .iter()
            .filter(|t| t.label() == Some(Label::InternalError) && t.priority() == Some(Severity::High))
            .map(|t| t.cluster_index)
            .collect(),
    };

    let mut selected = Vec::new();
    for idx in candidates {
        let Some(t) = by_index.get(&idx) else {
            notes.push(format!("{agent}: cluster {idx} does not exist, dropped"));
            continue;
        };
        let Some(v) = t.verdict.as_ref().filter(|_| t.is_ok()) else {
            notes.push(format!("{agent}: cluster {idx} failed triage, dropped"));
            continue;
        };
        if v.label == Label::Noise {
            notes.push(format!("{agent}: cluster {idx} is noise, dropped"));
            continue;
        }
        if let Some(min) = a.min_severity.filter(|min| v.severity < *min) {
            notes.push(format!(
                "{agent}: cluster {idx} severity {} below min_severity {}, dropped",
                v.severity.as_str(),
                min.as_str()
            ));
            continue;
        }
        if let Some(min) = a.min_confidence.filter(|min| v.confidence < *min) {
            notes.push(format!(
                "{agent}: cluster {idx} confidence {:.2} below min_confidence {min:.2}, dropped",
                v.confidence
            ));
            continue;
        }
        if req.feedback.blocks_drafting(t) {
            notes.push(format!(
                "{agent}: cluster {idx} ({}) excluded, rejected in feedback with unchanged triage",
                t.cluster_signature
            ));
            continue;
        }
        selected.push(idx);
    }

    if let Some(max) = a.max_tickets {
        if selected.len() > max {
            notes.push(format!(
                "{agent}: {} clusters truncated to max_tickets={max}",
                selected.len()
            ));
            selected.truncate(max);
        }
    }

    if selected.is_empty() {
        notes.push(format!("{agent}: no eligible clusters, set run=false"));
        return ActionSpec::off(agent);
    }

    ActionSpec {
        agent,
        run: true,
        scoped_inputs: ScopedInputs {
            cluster_indices: selected,
            max_tickets: a.max_tickets,
            min_severity: a.min_severity,
            min_confidence: a.min_confidence,
            ..ScopedInputs::default()
        },
    }
}

fn filter_spec(a: &RawAction, req: &DecisionRequest<'_>, notes: &mut Vec<String>) -> ActionSpec {
    let agent = AgentName::FilterSuggestions;
    let labels: Vec<Label> = match &a.for_labels {
        Some(l) if !l.is_empty() => {
            let mut l = l.clone();
            l.dedup();
            l
        }
        _ => DEFAULT_FILTER_LABELS.to_vec(),
    };
    let min_count = a.min_count.unwrap_or(1);

    let selected: Vec<usize> = req
        .triages
        .iter()
        .filter(|t| t.is_ok())
        .filter(|t| t.label().is_some_and(|l| labels.contains(&l)))
        .filter(|t| t.size >= min_count)
        .map(|t| t.cluster_index)
        .collect();

    if selected.is_empty() {
        notes.push(format!("{agent}: no clusters match {labels:?} with count >= {min_count}, set run=false"));
        return ActionSpec::off(agent);
    }

    ActionSpec {
        agent,
        run: true,
        scoped_inputs: ScopedInputs {
            cluster_indices: selected,
            for_labels: labels,
            min_count: Some(min_count),
            ..ScopedInputs::default()
        },
    }
}

fn doc_spec(a: &RawAction) -> ActionSpec {
    let sections = match &a.include_sections {
        Some(s) if !s.is_empty() => {
            let mut out = Vec::new();
            for sec in s {
                if !out.contains(sec) {
                    out.push(*sec);
                }
            }
            out
        }
        _ => Section::ALL.to_vec(),
    };
    ActionSpec {
        agent: AgentName::ConfluenceDraft,
        run: true,
        scoped_inputs: ScopedInputs {
            include_sections: sections,
            ..ScopedInputs::default()
        },
    }
}
