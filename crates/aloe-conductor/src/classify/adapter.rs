use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aloe_core::config::ClassifyConfig;
use aloe_core::{AloeError, Cluster, Issue, Triage, Verdict};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classify::validate::validate_verdict;
use crate::classify::{ClassifyRequest, Classifier};

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% additive jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let half_ms = (self.base.as_millis() / 2) as u64;
        let jitter = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// One triage per cluster plus an issue for each cluster that failed.
#[derive(Debug, Clone, Default)]
pub struct TriageBatch {
    pub triages: Vec<Triage>,
    pub issues: Vec<Issue>,
}

impl TriageBatch {
    pub fn failed(&self) -> impl Iterator<Item = &Triage> {
        self.triages.iter().filter(|t| !t.is_ok())
    }
}

/// Fans cluster classification out to a [`Classifier`] and folds the
/// answers back into one [`Triage`] per cluster, in cluster order.
pub struct ClassificationAdapter {
    classifier: Arc<dyn Classifier>,
    concurrency: usize,
    policy: RetryPolicy,
}

impl ClassificationAdapter {
    pub fn new(classifier: Arc<dyn Classifier>, cfg: &ClassifyConfig) -> Self {
        Self {
            classifier,
            concurrency: cfg.concurrency.max(1),
            policy: RetryPolicy {
                max_attempts: cfg.max_attempts.max(1),
                base: Duration::from_millis(cfg.backoff_ms),
                timeout: Duration::from_secs(cfg.timeout_sec.max(1)),
            },
        }
    }

    /// Classify every cluster. Never fails as a whole: a cluster whose call
    /// ultimately fails comes back as `triage_failed`.
    pub async fn triage_all(&self, clusters: &[Cluster], cancel: &CancellationToken) -> TriageBatch {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set: JoinSet<(String, Result<Verdict, AloeError>)> = JoinSet::new();

        for (i, cluster) in clusters.iter().enumerate() {
            let req = ClassifyRequest::from_cluster(i, cluster);
            let classifier = Arc::clone(&self.classifier);
            let semaphore = Arc::clone(&semaphore);
            let policy = self.policy.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => classify_with_retry(classifier.as_ref(), &req, &policy, &cancel).await,
                    Err(_) => Err(AloeError::ClassificationUnavailable("scheduler closed".into())),
                };
                (req.signature, outcome)
            });
        }

        // Re-key by signature; completion order carries no meaning.
        let mut by_signature: HashMap<String, Result<Verdict, AloeError>> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((signature, outcome)) => {
                    by_signature.insert(signature, outcome);
                }
                Err(e) => tracing::warn!(error = %e, "classification task aborted"),
            }
        }

        let mut batch = TriageBatch::default();
        for (i, cluster) in clusters.iter().enumerate() {
            let triage = match by_signature.remove(&cluster.signature) {
                Some(Ok(verdict)) => Triage::ok(i, cluster, verdict),
                Some(Err(e)) => {
                    tracing::warn!(signature = %cluster.signature, error = %e, "triage failed");
                    batch.issues.push(Issue::from_error(&cluster.signature, &e));
                    Triage::failed(i, cluster, e.to_string())
                }
                None => {
                    let e = AloeError::ClassificationUnavailable("classification task aborted".into());
                    batch.issues.push(Issue::from_error(&cluster.signature, &e));
                    Triage::failed(i, cluster, e.to_string())
                }
            };
            batch.triages.push(triage);
        }
        batch
    }
}

async fn classify_with_retry(
    classifier: &dyn Classifier,
    req: &ClassifyRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Verdict, AloeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = tokio::select! {
            r = tokio::time::timeout(policy.timeout, classifier.classify(req)) => match r {
                Ok(r) => r,
                Err(_) => Err(AloeError::ClassificationUnavailable(format!(
                    "timed out after {}s",
                    policy.timeout.as_secs()
                ))),
            },
            _ = cancel.cancelled() => {
                return Err(AloeError::ClassificationUnavailable("cancelled".into()));
            }
        };

        match response.and_then(|raw| validate_verdict(&raw)) {
            Ok(verdict) => return Ok(verdict),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                tracing::debug!(
                    signature = %req.signature,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "retrying classification"
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        return Err(AloeError::ClassificationUnavailable("cancelled".into()));
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}
