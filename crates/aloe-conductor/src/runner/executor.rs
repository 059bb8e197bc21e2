use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aloe_core::AloeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::{ActionAgent, ActionContext, ActionRequest};
use crate::plan::schema::{ActionPlan, ActionSpec, AgentName};
use crate::runner::event_log::{Event, EventLogger};
use crate::state::machine::{transition, ActionStatus, ActionUpdate, RunState, RunStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Skipped,
    Failed,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub action_name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn skipped(agent: AgentName, reason: &str) -> Self {
        Self {
            action_name: agent.as_str().to_string(),
            status: ResultStatus::Skipped,
            output: Value::Null,
            error: Some(reason.to_string()),
            duration_ms: 0,
        }
    }

    fn finished(agent: AgentName, outcome: Result<Value, AloeError>, duration_ms: u64) -> Self {
        let (status, output, error) = match outcome {
            Ok(v) => (ResultStatus::Ok, v, None),
            Err(e) => (ResultStatus::Failed, Value::Null, Some(e.to_string())),
        };
        Self {
            action_name: agent.as_str().to_string(),
            status,
            output,
            error,
            duration_ms,
        }
    }
}

/// Results keyed by action name plus the final action states.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub results: BTreeMap<String, ExecutionResult>,
    pub state: RunState,
}

impl ExecutionReport {
    pub fn cancelled(&self) -> bool {
        self.state.status == RunStatus::Cancelled
    }
}

/// Runs a plan's actions with per-action failure isolation.
///
/// Actions are grouped into waves by dependency; actions in one wave run
/// concurrently up to `concurrency`. Each action gets its own task so a panic
/// or timeout is contained to that action's result.
pub struct PlanExecutor {
    agents: HashMap<AgentName, Arc<dyn ActionAgent>>,
    concurrency: usize,
    timeout: Duration,
}

impl PlanExecutor {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            agents: HashMap::new(),
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub fn register(mut self, agent: Arc<dyn ActionAgent>) -> Self {
        self.agents.insert(agent.name(), agent);
        self
    }

    pub async fn execute(
        &self,
        plan: &ActionPlan,
        ctx: Arc<ActionContext>,
        events: &mut EventLogger,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let mut state = RunState::from_plan(&ctx.run_id, plan);
        let mut results: BTreeMap<String, ExecutionResult> = BTreeMap::new();
        let mut ok_outputs: BTreeMap<AgentName, Value> = BTreeMap::new();

        for spec in plan.actions.iter().filter(|a| !a.run) {
            settle_skipped(&mut state, &mut results, events, spec.agent, "run=false");
        }

        for wave in waves(plan) {
            if cancel.is_cancelled() {
                for spec in &wave {
                    settle_skipped(&mut state, &mut results, events, spec.agent, "cancelled before start");
                }
                continue;
            }
            self.run_wave(&wave, &ctx, &ok_outputs, &mut state, &mut results, events, &cancel)
                .await;
            for spec in &wave {
                if let Some(r) = results.get(spec.agent.as_str()) {
                    if r.status == ResultStatus::Ok {
                        ok_outputs.insert(spec.agent, r.output.clone());
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            state.status = RunStatus::Cancelled;
        } else {
            state.update_status();
        }
        events.record(Event::RunCompleted {
            ok: state.count(ActionStatus::Ok),
            failed: state.count(ActionStatus::Failed),
            skipped: state.count(ActionStatus::Skipped),
        });
        ExecutionReport { results, state }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_wave(
        &self,
        wave: &[ActionSpec],
        ctx: &Arc<ActionContext>,
        ok_outputs: &BTreeMap<AgentName, Value>,
        state: &mut RunState,
        results: &mut BTreeMap<String, ExecutionResult>,
        events: &mut EventLogger,
        cancel: &CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set: JoinSet<(AgentName, Result<Value, AloeError>, u64)> = JoinSet::new();

        for spec in wave {
            let agent_name = spec.agent;
            let Some(agent) = self.agents.get(&agent_name).cloned() else {
                start(state, events, agent_name);
                let err = AloeError::action_failed(agent_name.as_str(), "no agent registered");
                settle_finished(state, results, events, agent_name, Err(err), 0);
                continue;
            };

            let permit = tokio::select! {
                p = semaphore.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => {
                    settle_skipped(state, results, events, agent_name, "cancelled before start");
                    continue;
                }
            };

            start(state, events, agent_name);
            let req = ActionRequest {
                spec: spec.clone(),
                upstream: agent_name
                    .depends_on()
                    .iter()
                    .filter_map(|d| ok_outputs.get(d).map(|v| (*d, v.clone())))
                    .collect(),
            };
            let ctx = Arc::clone(ctx);
            let cancel = cancel.clone();
            let timeout = self.timeout;
            set.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let outcome = run_isolated(agent, req, ctx, cancel, timeout).await;
                (agent_name, outcome, started.elapsed().as_millis() as u64)
            });
        }

        // Single collector: every result key is written here exactly once.
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((agent, outcome, ms)) => settle_finished(state, results, events, agent, outcome, ms),
                Err(e) => tracing::error!(error = %e, "action supervisor task lost"),
            }
        }

        for spec in wave {
            let still_running = state
                .get_action(spec.agent)
                .map(|a| a.status == ActionStatus::Running)
                .unwrap_or(false);
            if still_running {
                let err = AloeError::action_failed(spec.agent.as_str(), "action task lost");
                settle_finished(state, results, events, spec.agent, Err(err), 0);
            }
        }
    }
}

/// Run one agent in its own task so panics, timeouts and cancellation are
/// turned into an error for that action only.
async fn run_isolated(
    agent: Arc<dyn ActionAgent>,
    req: ActionRequest,
    ctx: Arc<ActionContext>,
    cancel: CancellationToken,
    timeout: Duration,
) -> Result<Value, AloeError> {
    let name = req.spec.agent;
    let token = cancel.child_token();
    let mut handle = tokio::spawn({
        let token = token.clone();
        async move { agent.run(&req, ctx.as_ref(), token).await }
    });

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(AloeError::action_failed(name.as_str(), "agent panicked")),
            Err(e) => Err(AloeError::action_failed(name.as_str(), e.to_string())),
        },
        _ = tokio::time::sleep(timeout) => {
            token.cancel();
            handle.abort();
            Err(AloeError::action_failed(
                name.as_str(),
                format!("timed out after {}s", timeout.as_secs()),
            ))
        }
        _ = cancel.cancelled() => {
            handle.abort();
            Err(AloeError::action_failed(name.as_str(), "cancelled"))
        }
    }
}

/// Runnable actions grouped so every action comes after its dependencies.
fn waves(plan: &ActionPlan) -> Vec<Vec<ActionSpec>> {
    let mut level: HashMap<AgentName, usize> = HashMap::new();
    let mut out: Vec<Vec<ActionSpec>> = Vec::new();
    for spec in plan.runnable() {
        let l = spec
            .agent
            .depends_on()
            .iter()
            .filter_map(|d| level.get(d))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level.insert(spec.agent, l);
        if out.len() <= l {
            out.resize_with(l + 1, Vec::new);
        }
        out[l].push(spec.clone());
    }
    out
}

/// Apply a transition; a CAS miss or an invalid edge is logged and leaves
/// the action untouched.
fn advance(
    state: &mut RunState,
    agent: AgentName,
    from: ActionStatus,
    to: ActionStatus,
    update: ActionUpdate,
) -> bool {
    match transition(state, agent, from, to, Some(update)) {
        Ok(true) => true,
        Ok(false) => {
            let current = state.get_action(agent).map(|a| a.status).ok();
            tracing::warn!(action = %agent, ?from, ?to, ?current, "action not in expected state, transition skipped");
            false
        }
        Err(e) => {
            tracing::warn!(action = %agent, ?from, ?to, error = %e, "action transition rejected");
            false
        }
    }
}

fn start(state: &mut RunState, events: &mut EventLogger, agent: AgentName) {
    advance(
        state,
        agent,
        ActionStatus::Pending,
        ActionStatus::Running,
        ActionUpdate::started(),
    );
    state.update_status();
    events.record(Event::ActionStart {
        action: agent.as_str().to_string(),
    });
}

fn settle_skipped(
    state: &mut RunState,
    results: &mut BTreeMap<String, ExecutionResult>,
    events: &mut EventLogger,
    agent: AgentName,
    reason: &str,
) {
    advance(
        state,
        agent,
        ActionStatus::Pending,
        ActionStatus::Skipped,
        ActionUpdate::skipped(reason),
    );
    events.record(Event::ActionSkipped {
        action: agent.as_str().to_string(),
        reason: reason.to_string(),
    });
    insert_once(results, ExecutionResult::skipped(agent, reason));
}

fn settle_finished(
    state: &mut RunState,
    results: &mut BTreeMap<String, ExecutionResult>,
    events: &mut EventLogger,
    agent: AgentName,
    outcome: Result<Value, AloeError>,
    duration_ms: u64,
) {
    let result = ExecutionResult::finished(agent, outcome, duration_ms);
    let (to, event) = match result.status {
        ResultStatus::Ok => {
            tracing::info!(action = %agent, duration_ms, "action ok");
            (
                ActionStatus::Ok,
                Event::ActionOk {
                    action: agent.as_str().to_string(),
                    duration_ms,
                },
            )
        }
        _ => {
            let error = result.error.clone().unwrap_or_default();
            tracing::warn!(action = %agent, duration_ms, error = %error, "action failed");
            (
                ActionStatus::Failed,
                Event::ActionFailed {
                    action: agent.as_str().to_string(),
                    duration_ms,
                    error,
                },
            )
        }
    };
    advance(
        state,
        agent,
        ActionStatus::Running,
        to,
        ActionUpdate::completed(result.error.clone()),
    );
    events.record(event);
    insert_once(results, result);
}

fn insert_once(results: &mut BTreeMap<String, ExecutionResult>, result: ExecutionResult) {
    use std::collections::btree_map::Entry;
    match results.entry(result.action_name.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(result);
        }
        Entry::Occupied(_) => {
            tracing::error!(action = %result.action_name, "duplicate result ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{MockAgent, MockBehavior};
    use crate::plan::schema::{GlobalPolicy, PlanSource, ScopedInputs};
    use aloe_core::Summary;
    use serde_json::json;

    fn ctx() -> Arc<ActionContext> {
        Arc::new(ActionContext {
            run_id: "run_test".into(),
            clusters: Vec::new(),
            triages: Vec::new(),
            summary: Summary::default(),
        })
    }

    fn plan(run: [bool; 3]) -> ActionPlan {
        ActionPlan {
            actions: AgentName::ALL
                .into_iter()
                .zip(run)
                .map(|(agent, run)| ActionSpec {
                    agent,
                    run,
                    scoped_inputs: ScopedInputs::default(),
                })
                .collect(),
            global_policy: GlobalPolicy::default(),
            reason: "test".into(),
            source: PlanSource::Decision,
            adjustments: Vec::new(),
        }
    }

    fn executor(agents: Vec<Arc<MockAgent>>) -> PlanExecutor {
        agents.into_iter().fold(
            PlanExecutor::new(3, Duration::from_secs(5)),
            |ex, a| ex.register(a),
        )
    }

    #[test]
    fn out_of_order_transitions_leave_state_alone() {
        let mut state = RunState::from_plan("run_test", &plan([true, true, true]));
        assert!(advance(
            &mut state,
            AgentName::JiraDrafts,
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionUpdate::started(),
        ));
        // Already running: a second start misses.
        assert!(!advance(
            &mut state,
            AgentName::JiraDrafts,
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionUpdate::started(),
        ));
        // Pending cannot jump straight to ok.
        assert!(!advance(
            &mut state,
            AgentName::FilterSuggestions,
            ActionStatus::Pending,
            ActionStatus::Ok,
            ActionUpdate::completed(None),
        ));
        assert_eq!(
            state.get_action(AgentName::FilterSuggestions).unwrap().status,
            ActionStatus::Pending
        );
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn run_false_is_skipped_without_calling() {
        let jira = Arc::new(MockAgent::new(AgentName::JiraDrafts, MockBehavior::Succeed(json!({}))));
        let ex = executor(vec![jira.clone()]);
        let report = ex
            .execute(&plan([false, false, false]), ctx(), &mut EventLogger::disabled(), CancellationToken::new())
            .await;
        assert_eq!(jira.calls(), 0);
        assert_eq!(report.results.len(), 3);
        assert!(report.results.values().all(|r| r.status == ResultStatus::Skipped));
        assert_eq!(report.state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn failure_is_isolated() {
        let jira = Arc::new(MockAgent::new(AgentName::JiraDrafts, MockBehavior::Fail("tracker down".into())));
        let filters = Arc::new(MockAgent::new(
            AgentName::FilterSuggestions,
            MockBehavior::Succeed(json!({"filters": []})),
        ));
        let doc = Arc::new(MockAgent::new(AgentName::ConfluenceDraft, MockBehavior::Succeed(json!("doc"))));
        let ex = executor(vec![jira, filters, doc.clone()]);
        let report = ex
            .execute(&plan([true, true, true]), ctx(), &mut EventLogger::disabled(), CancellationToken::new())
            .await;

        let j = &report.results["JiraDrafts"];
        assert_eq!(j.status, ResultStatus::Failed);
        assert!(j.error.as_deref().unwrap().contains("tracker down"));
        assert_eq!(report.results["FilterSuggestions"].status, ResultStatus::Ok);
        assert_eq!(report.results["ConfluenceDraft"].status, ResultStatus::Ok);
        assert_eq!(report.state.status, RunStatus::Partial);

        // Only the successful upstream output is handed to the dependent.
        let seen = doc.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].upstream.contains_key(&AgentName::FilterSuggestions));
        assert!(!seen[0].upstream.contains_key(&AgentName::JiraDrafts));
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let jira = Arc::new(MockAgent::new(AgentName::JiraDrafts, MockBehavior::Panic));
        let filters = Arc::new(MockAgent::new(AgentName::FilterSuggestions, MockBehavior::Succeed(json!(1))));
        let ex = executor(vec![jira, filters]);
        let report = ex
            .execute(&plan([true, true, false]), ctx(), &mut EventLogger::disabled(), CancellationToken::new())
            .await;
        assert_eq!(report.results["JiraDrafts"].status, ResultStatus::Failed);
        assert!(report.results["JiraDrafts"].error.as_deref().unwrap().contains("panicked"));
        assert_eq!(report.results["FilterSuggestions"].output, json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_isolated() {
        let jira = Arc::new(MockAgent::new(AgentName::JiraDrafts, MockBehavior::Sleep(Duration::from_secs(600))));
        let filters = Arc::new(MockAgent::new(AgentName::FilterSuggestions, MockBehavior::Succeed(json!(2))));
        let ex = executor(vec![jira, filters]);
        let report = ex
            .execute(&plan([true, true, false]), ctx(), &mut EventLogger::disabled(), CancellationToken::new())
            .await;
        let j = &report.results["JiraDrafts"];
        assert_eq!(j.status, ResultStatus::Failed);
        assert!(j.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.results["FilterSuggestions"].status, ResultStatus::Ok);
    }

    #[tokio::test]
    async fn unregistered_agent_fails_its_action_only() {
        let filters = Arc::new(MockAgent::new(AgentName::FilterSuggestions, MockBehavior::Succeed(json!(3))));
        let ex = executor(vec![filters]);
        let report = ex
            .execute(&plan([true, true, false]), ctx(), &mut EventLogger::disabled(), CancellationToken::new())
            .await;
        assert_eq!(report.results["JiraDrafts"].status, ResultStatus::Failed);
        assert_eq!(report.results["FilterSuggestions"].status, ResultStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_completed_results() {
        let jira = Arc::new(MockAgent::new(AgentName::JiraDrafts, MockBehavior::Sleep(Duration::from_secs(30))));
        let filters = Arc::new(MockAgent::new(AgentName::FilterSuggestions, MockBehavior::Succeed(json!("done"))));
        let doc = Arc::new(MockAgent::new(AgentName::ConfluenceDraft, MockBehavior::Succeed(json!("doc"))));
        let ex = executor(vec![jira, filters, doc.clone()]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = ex
            .execute(&plan([true, true, true]), ctx(), &mut EventLogger::disabled(), cancel)
            .await;
        assert!(report.cancelled());
        assert_eq!(report.results["FilterSuggestions"].status, ResultStatus::Ok);
        assert_eq!(report.results["FilterSuggestions"].output, json!("done"));
        assert_eq!(report.results["JiraDrafts"].status, ResultStatus::Failed);
        assert_eq!(report.results["ConfluenceDraft"].status, ResultStatus::Skipped);
        assert_eq!(doc.calls(), 0);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn events_are_logged() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        let mut log = EventLogger::new(&path);
        let filters = Arc::new(MockAgent::new(AgentName::FilterSuggestions, MockBehavior::Succeed(json!(0))));
        executor(vec![filters])
            .execute(&plan([false, true, false]), ctx(), &mut log, CancellationToken::new())
            .await;
        let content = std::fs::read_to_string(&path).unwrap();
        let types: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            types,
            vec!["action_skipped", "action_skipped", "action_start", "action_ok", "run_completed"]
        );
    }

    #[test]
    fn waves_respect_dependencies() {
        let w = waves(&plan([true, true, true]));
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].len(), 2);
        assert_eq!(w[1][0].agent, AgentName::ConfluenceDraft);

        let only_doc = waves(&plan([false, false, true]));
        assert_eq!(only_doc.len(), 1);
        assert_eq!(only_doc[0][0].agent, AgentName::ConfluenceDraft);
    }
}
