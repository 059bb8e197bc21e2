pub mod adapter;
pub mod validate;

use std::collections::HashMap;
use std::time::Duration;

use aloe_core::{AloeError, Cluster, LogLevel};
use serde::Serialize;
use serde_json::Value;

/// What the classification capability sees for one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub signature: String,
    pub cluster_index: usize,
    pub service: String,
    pub class: String,
    pub pattern: String,
    pub representative: String,
    pub level: LogLevel,
    pub stack_excerpt: String,
    pub count: usize,
}

impl ClassifyRequest {
    pub fn from_cluster(cluster_index: usize, cluster: &Cluster) -> Self {
        Self {
            signature: cluster.signature.clone(),
            cluster_index,
            service: cluster.service.clone(),
            class: cluster.class.clone(),
            pattern: cluster.pattern.clone(),
            representative: cluster.representative.message.clone(),
            level: cluster.representative.level,
            stack_excerpt: cluster.representative.stack_excerpt(),
            count: cluster.size,
        }
    }
}

/// A capability that labels one cluster.
///
/// Implementations return the raw response; the adapter validates it.
/// Transient failures must be reported as `ClassificationUnavailable` so
/// they are retried.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, req: &ClassifyRequest) -> Result<Value, AloeError>;
}

// ── Mock (for testing) ──

#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(Value),
    Unavailable,
    /// Never answers within any sane timeout.
    Hang,
}

/// Scripted classifier. Replies are popped per signature; once a script is
/// exhausted (or absent) the default reply is used.
pub struct MockClassifier {
    default: MockReply,
    scripts: std::sync::Mutex<HashMap<String, Vec<MockReply>>>,
    calls: std::sync::Mutex<HashMap<String, usize>>,
}

impl MockClassifier {
    pub fn new(default: MockReply) -> Self {
        Self {
            default,
            scripts: std::sync::Mutex::new(HashMap::new()),
            calls: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn set_replies(&self, signature: &str, replies: Vec<MockReply>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(signature.to_string(), replies);
    }

    pub fn calls_for(&self, signature: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(signature)
            .copied()
            .unwrap_or(0)
    }

    fn next_reply(&self, signature: &str) -> MockReply {
        *self
            .calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(signature.to_string())
            .or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        match scripts.get_mut(signature) {
            Some(list) if !list.is_empty() => list.remove(0),
            _ => self.default.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, req: &ClassifyRequest) -> Result<Value, AloeError> {
        match self.next_reply(&req.signature) {
            MockReply::Respond(v) => Ok(v),
            MockReply::Unavailable => Err(AloeError::ClassificationUnavailable(
                "429 rate limited".into(),
            )),
            MockReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AloeError::ClassificationUnavailable("hung".into()))
            }
        }
    }
}
