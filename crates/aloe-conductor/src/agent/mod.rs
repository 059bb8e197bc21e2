pub mod external;
pub mod outputs;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aloe_core::{AloeError, Cluster, Summary, Triage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::plan::schema::{ActionSpec, AgentName};

/// Read-only run data shared by every action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub run_id: String,
    pub clusters: Vec<Cluster>,
    pub triages: Vec<Triage>,
    pub summary: Summary,
}

impl ActionContext {
    /// The (cluster, triage) pairs an action was scoped to, in index order.
    /// Indices that do not resolve are skipped.
    pub fn selected(&self, spec: &ActionSpec) -> Vec<(&Cluster, &Triage)> {
        spec.scoped_inputs
            .cluster_indices
            .iter()
            .filter_map(|&i| {
                let cluster = self.clusters.get(i)?;
                let triage = self.triages.iter().find(|t| t.cluster_index == i)?;
                Some((cluster, triage))
            })
            .collect()
    }
}

/// One action invocation: its spec plus ok outputs of the agents it
/// depends on that already finished in this run.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub spec: ActionSpec,
    pub upstream: BTreeMap<AgentName, Value>,
}

/// A downstream action agent.
#[async_trait::async_trait]
pub trait ActionAgent: Send + Sync {
    fn name(&self) -> AgentName;

    async fn run(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
        cancel: CancellationToken,
    ) -> Result<Value, AloeError>;
}

// ── Mock (for testing) ──

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed(Value),
    Fail(String),
    Panic,
    /// Sleep for the duration, then succeed with `null`. Honors cancellation.
    Sleep(Duration),
}

/// Scripted agent that records how often it ran and what it was given.
pub struct MockAgent {
    name: AgentName,
    behavior: MockBehavior,
    calls: AtomicUsize,
    seen: std::sync::Mutex<Vec<ActionRequest>>,
}

impl MockAgent {
    pub fn new(name: AgentName, behavior: MockBehavior) -> Self {
        Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ActionAgent for MockAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    async fn run(
        &self,
        req: &ActionRequest,
        _ctx: &ActionContext,
        cancel: CancellationToken,
    ) -> Result<Value, AloeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(req.clone());
        match &self.behavior {
            MockBehavior::Succeed(v) => Ok(v.clone()),
            MockBehavior::Fail(msg) => Err(AloeError::action_failed(self.name.as_str(), msg)),
            MockBehavior::Panic => panic!("mock agent {} panicked", self.name),
            MockBehavior::Sleep(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(*d) => Ok(Value::Null),
                    _ = cancel.cancelled() => Err(AloeError::action_failed(self.name.as_str(), "cancelled")),
                }
            }
        }
    }
}
