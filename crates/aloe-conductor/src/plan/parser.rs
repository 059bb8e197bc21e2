//! Parsing of untrusted decision output.
//!
//! A decision arrives as a list of actions:
//!
//! ```json
//! {
//!   "actions": [
//!     {"agent": "JiraDrafts", "run": true, "max_tickets": 3, "min_severity": "high",
//!      "min_confidence": 0.6, "cluster_indices": [0, 2]},
//!     {"agent": "FilterSuggestions", "run": true,
//!      "scoped_inputs": {"for_labels": ["noise"], "min_count": 5}},
//!     {"agent": "ConfluenceDraft", "run": false}
//!   ],
//!   "global_policy": {"ticket_strategy": "balanced", "noise_handling": "basic_filters"},
//!   "reason": "..."
//! }
//! ```
//!
//! Scoping fields sit either beside `agent`/`run` or inside `scoped_inputs`.
//! An object keyed by agent name (`{"JiraDrafts": {"run": true}, ...}`) is
//! accepted too. Unknown fields are rejected in both shapes, and a decision
//! must name at least one agent.
//!
//! Parsing checks shape only. Cross-checks against the run's triage happen in
//! the engine.

use aloe_core::{AloeError, Label, Severity};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::plan::schema::{AgentName, GlobalPolicy, Section};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawAction {
    pub run: bool,
    #[serde(default)]
    pub cluster_indices: Option<Vec<usize>>,
    #[serde(default)]
    pub max_tickets: Option<usize>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub for_labels: Option<Vec<Label>>,
    #[serde(default)]
    pub min_count: Option<usize>,
    #[serde(default)]
    pub include_sections: Option<Vec<Section>>,
}

impl RawAction {
    /// True when any scoping field was set.
    pub fn carries_inputs(&self) -> bool {
        let neutral = RawAction {
            run: self.run,
            ..RawAction::default()
        };
        *self != neutral
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawPlan {
    #[serde(rename = "JiraDrafts", default)]
    pub jira_drafts: Option<RawAction>,
    #[serde(rename = "FilterSuggestions", default)]
    pub filter_suggestions: Option<RawAction>,
    #[serde(rename = "ConfluenceDraft", default)]
    pub confluence_draft: Option<RawAction>,
    #[serde(default)]
    pub global_policy: Option<GlobalPolicy>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RawPlan {
    pub fn action(&self, agent: AgentName) -> Option<&RawAction> {
        match agent {
            AgentName::JiraDrafts => self.jira_drafts.as_ref(),
            AgentName::FilterSuggestions => self.filter_suggestions.as_ref(),
            AgentName::ConfluenceDraft => self.confluence_draft.as_ref(),
        }
    }

    fn slot(&mut self, agent: AgentName) -> &mut Option<RawAction> {
        match agent {
            AgentName::JiraDrafts => &mut self.jira_drafts,
            AgentName::FilterSuggestions => &mut self.filter_suggestions,
            AgentName::ConfluenceDraft => &mut self.confluence_draft,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ListedPlan {
    actions: Vec<Value>,
    #[serde(default)]
    global_policy: Option<GlobalPolicy>,
    #[serde(default)]
    reason: Option<String>,
}

fn invalid(message: impl Into<String>) -> AloeError {
    AloeError::DecisionSchemaInvalid(message.into())
}

/// Parse and shape-check a raw decision.
pub fn parse_decision(raw: &Value) -> Result<RawPlan, AloeError> {
    let Some(obj) = raw.as_object() else {
        return Err(invalid("decision is not a JSON object"));
    };
    let plan = if obj.contains_key("actions") {
        parse_listed(raw)?
    } else {
        serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?
    };
    if AgentName::ALL.iter().all(|a| plan.action(*a).is_none()) {
        return Err(invalid("decision names none of the known agents"));
    }
    validate(&plan)?;
    Ok(plan)
}

fn parse_listed(raw: &Value) -> Result<RawPlan, AloeError> {
    let listed: ListedPlan = serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
    let mut plan = RawPlan {
        global_policy: listed.global_policy,
        reason: listed.reason,
        ..RawPlan::default()
    };
    for (i, item) in listed.actions.into_iter().enumerate() {
        let (agent, action) = parse_listed_action(i, item)?;
        let slot = plan.slot(agent);
        if slot.is_some() {
            return Err(invalid(format!("actions[{i}]: {agent} listed twice")));
        }
        *slot = Some(action);
    }
    Ok(plan)
}

fn parse_listed_action(i: usize, item: Value) -> Result<(AgentName, RawAction), AloeError> {
    let Value::Object(mut fields) = item else {
        return Err(invalid(format!("actions[{i}] is not an object")));
    };
    let agent = match fields.remove("agent") {
        Some(Value::String(name)) => AgentName::parse(&name)
            .ok_or_else(|| invalid(format!("actions[{i}]: unknown agent {name:?}")))?,
        _ => return Err(invalid(format!("actions[{i}]: missing agent name"))),
    };
    match fields.remove("scoped_inputs") {
        None | Some(Value::Null) => {}
        Some(Value::Object(inputs)) => merge_inputs(i, &mut fields, inputs)?,
        Some(_) => return Err(invalid(format!("actions[{i}].scoped_inputs is not an object"))),
    }
    let action = serde_json::from_value(Value::Object(fields))
        .map_err(|e| invalid(format!("actions[{i}] ({agent}): {e}")))?;
    Ok((agent, action))
}

fn merge_inputs(i: usize, fields: &mut Map<String, Value>, inputs: Map<String, Value>) -> Result<(), AloeError> {
    for (key, value) in inputs {
        if key == "run" || fields.contains_key(&key) {
            return Err(invalid(format!("actions[{i}]: {key} set twice")));
        }
        fields.insert(key, value);
    }
    Ok(())
}

fn validate(plan: &RawPlan) -> Result<(), AloeError> {
    for agent in AgentName::ALL {
        let Some(action) = plan.action(agent) else {
            continue;
        };
        if let Some(c) = action.min_confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(AloeError::DecisionSchemaInvalid(format!(
                    "{agent}.min_confidence {c} outside [0, 1]"
                )));
            }
        }
        if action.max_tickets == Some(0) && action.run {
            return Err(AloeError::DecisionSchemaInvalid(format!(
                "{agent}.max_tickets is 0 while run is true"
            )));
        }
    }
    Ok(())
}
