use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aloe_core::{AloeError, Summary, Triage};
use aloe_ledger::FeedbackSnapshot;
use serde_json::Value;

use crate::plan::schema::PlanSource;

/// Everything a decision source may look at.
pub struct DecisionRequest<'a> {
    pub summary: &'a Summary,
    pub triages: &'a [Triage],
    pub feedback: &'a FeedbackSnapshot,
}

/// A capability that proposes which actions to run.
///
/// Output is untrusted JSON; the plan engine parses and enforces it.
#[async_trait::async_trait]
pub trait DecisionSource: Send + Sync {
    /// How plans derived from this source are labelled.
    fn kind(&self) -> PlanSource {
        PlanSource::Decision
    }

    async fn decide(&self, req: &DecisionRequest<'_>) -> Result<Value, AloeError>;
}

/// Scripted decision source (for testing).
pub struct MockDecision {
    response: Result<Value, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockDecision {
    pub fn returning(value: Value) -> Self {
        Self {
            response: Ok(value),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DecisionSource for MockDecision {
    async fn decide(&self, _req: &DecisionRequest<'_>) -> Result<Value, AloeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.response
            .clone()
            .map_err(AloeError::DecisionUnavailable)
    }
}
