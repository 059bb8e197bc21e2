use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::plan::schema::{ActionPlan, AgentName};

// ── Status enums ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Ok,
    Skipped,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Every action settled and none failed.
    Completed,
    /// Every action settled, at least one failed.
    Partial,
    Cancelled,
}

// ── State types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionState {
    pub agent: AgentName,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub actions: Vec<ActionState>,
    #[serde(default)]
    pub version: u32,
}

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(ActionStatus, &[ActionStatus])] = &[
    (
        ActionStatus::Pending,
        &[ActionStatus::Running, ActionStatus::Skipped],
    ),
    (
        ActionStatus::Running,
        &[ActionStatus::Ok, ActionStatus::Failed],
    ),
    // Ok, Skipped and Failed are terminal
];

fn is_valid_transition(from: ActionStatus, to: ActionStatus) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

// ── Side effects ──

/// Optional side-effect data applied during a transition.
#[derive(Debug, Clone, Default)]
pub struct ActionUpdate {
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
}

impl ActionUpdate {
    pub fn started() -> Self {
        Self {
            started_at: Some(aloe_core::now_rfc3339()),
            ..Self::default()
        }
    }

    pub fn completed(error: Option<String>) -> Self {
        Self {
            completed_at: Some(aloe_core::now_rfc3339()),
            error,
            ..Self::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            completed_at: Some(aloe_core::now_rfc3339()),
            skip_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn apply(self, action: &mut ActionState) {
        if let Some(v) = self.started_at {
            action.started_at = Some(v);
        }
        if let Some(v) = self.completed_at {
            action.completed_at = Some(v);
        }
        if self.error.is_some() {
            action.error = self.error;
        }
        if let Some(v) = self.skip_reason {
            action.skip_reason = Some(v);
        }
    }
}

// ── CAS-guarded transition ──

/// Transition an action from `from` to `to`, applying side effects.
/// Returns Ok(true) on success, Ok(false) on CAS miss (current != from).
pub fn transition(
    state: &mut RunState,
    agent: AgentName,
    from: ActionStatus,
    to: ActionStatus,
    side_effect: Option<ActionUpdate>,
) -> Result<bool> {
    let action = state.get_action_mut(agent)?;
    if action.status != from {
        return Ok(false);
    }
    if !is_valid_transition(from, to) {
        bail!("invalid transition: {agent} {from:?} → {to:?}");
    }
    action.status = to;
    if let Some(update) = side_effect {
        update.apply(action);
    }
    state.version += 1;
    Ok(true)
}

// ── RunState methods ──

impl RunState {
    /// One pending action per plan entry.
    pub fn from_plan(run_id: &str, plan: &ActionPlan) -> Self {
        let actions = plan
            .actions
            .iter()
            .map(|a| ActionState {
                agent: a.agent,
                status: ActionStatus::Pending,
                started_at: None,
                completed_at: None,
                error: None,
                skip_reason: None,
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            actions,
            version: 0,
        }
    }

    pub fn get_action(&self, agent: AgentName) -> Result<&ActionState> {
        self.actions
            .iter()
            .find(|a| a.agent == agent)
            .ok_or_else(|| anyhow::anyhow!("action not found: {agent}"))
    }

    pub fn get_action_mut(&mut self, agent: AgentName) -> Result<&mut ActionState> {
        self.actions
            .iter_mut()
            .find(|a| a.agent == agent)
            .ok_or_else(|| anyhow::anyhow!("action not found: {agent}"))
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.actions.iter().filter(|a| a.status == status).count()
    }

    /// Derive run status from action states. A cancelled run stays cancelled.
    pub fn update_status(&mut self) {
        if self.status == RunStatus::Cancelled {
            return;
        }
        self.status = if self.actions.iter().any(|a| a.status == ActionStatus::Running) {
            RunStatus::Running
        } else if !self.actions.iter().all(|a| a.status.is_terminal()) {
            if self.version == 0 {
                RunStatus::Pending
            } else {
                RunStatus::Running
            }
        } else if self.count(ActionStatus::Failed) > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
    }
}
