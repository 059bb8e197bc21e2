use aloe_core::AloeError;
use serde_json::Value;

use crate::agent::outputs::TicketDraft;

/// Where raw log records come from.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch(&self) -> anyhow::Result<Vec<Value>>;
}

/// Ticket creation. Returns the created ticket's key.
#[async_trait::async_trait]
pub trait TicketSink: Send + Sync {
    async fn create(&self, draft: &TicketDraft) -> Result<String, AloeError>;
}

/// Documentation publishing. Returns a reference to the published page.
#[async_trait::async_trait]
pub trait DocPublisher: Send + Sync {
    async fn publish(&self, title: &str, markdown: &str) -> Result<String, AloeError>;
}

/// Reports usage counters of external services for the run manifest.
pub trait UsageReporter: Send + Sync {
    fn usage(&self) -> Value;
}

// ── In-memory implementations (for testing) ──

/// Records drafts and hands out sequential keys.
#[derive(Default)]
pub struct CollectTickets {
    created: std::sync::Mutex<Vec<TicketDraft>>,
    fail_for: Option<String>,
}

impl CollectTickets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail creation for drafts with this signature.
    pub fn failing_for(signature: &str) -> Self {
        Self {
            created: std::sync::Mutex::new(Vec::new()),
            fail_for: Some(signature.to_string()),
        }
    }

    pub fn created(&self) -> Vec<TicketDraft> {
        self.created.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl TicketSink for CollectTickets {
    async fn create(&self, draft: &TicketDraft) -> Result<String, AloeError> {
        if self.fail_for.as_deref() == Some(draft.cluster_signature.as_str()) {
            return Err(AloeError::action_failed("ticket", "tracker rejected the issue"));
        }
        let mut created = self.created.lock().unwrap_or_else(|p| p.into_inner());
        created.push(draft.clone());
        Ok(format!("MOCK-{}", created.len()))
    }
}

/// Records published pages.
#[derive(Default)]
pub struct CollectPages {
    pages: std::sync::Mutex<Vec<(String, String)>>,
}

impl CollectPages {
    pub fn pages(&self) -> Vec<(String, String)> {
        self.pages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl DocPublisher for CollectPages {
    async fn publish(&self, title: &str, markdown: &str) -> Result<String, AloeError> {
        let mut pages = self.pages.lock().unwrap_or_else(|p| p.into_inner());
        pages.push((title.to_string(), markdown.to_string()));
        Ok(format!("page-{}", pages.len()))
    }
}

/// Fixed in-memory records.
pub struct StaticSource(pub Vec<Value>);

#[async_trait::async_trait]
impl LogSource for StaticSource {
    fn describe(&self) -> String {
        format!("static({} records)", self.0.len())
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        Ok(self.0.clone())
    }
}
