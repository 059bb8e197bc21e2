//! Optional second clustering pass.
//!
//! Masking only folds records whose variable parts it recognises. A
//! reasoning capability can spot clusters that still describe the same error
//! (file names, odd id formats) and propose groups of them. The groups are
//! untrusted: any inconsistency and the clusters pass through untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aloe_core::{AloeError, Cluster, Issue};
use serde::Serialize;
use serde_json::Value;

/// Compact view of one cluster as shown to the refiner.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefineItem {
    pub idx: usize,
    pub service: String,
    pub class: String,
    pub pattern: String,
    pub message: String,
    pub count: usize,
}

/// A capability that groups clusters describing the same underlying error.
///
/// Expected output: `{"groups": [{"canonical_idx": n, "member_idxs": [n, ..]}]}`.
#[async_trait::async_trait]
pub trait ClusterRefiner: Send + Sync {
    async fn group(&self, items: &[RefineItem]) -> Result<Value, AloeError>;
}

/// Outcome of one refinement pass.
#[derive(Debug, Clone)]
pub struct Refinement {
    pub clusters: Vec<Cluster>,
    /// Clusters absorbed into another one.
    pub merged: usize,
    pub issue: Option<Issue>,
}

impl Refinement {
    fn unchanged(clusters: Vec<Cluster>, issue: Option<Issue>) -> Self {
        Self {
            clusters,
            merged: 0,
            issue,
        }
    }
}

pub struct ClusterRefinement {
    refiner: Arc<dyn ClusterRefiner>,
    timeout: Duration,
}

impl ClusterRefinement {
    pub fn new(refiner: Arc<dyn ClusterRefiner>, timeout: Duration) -> Self {
        Self { refiner, timeout }
    }

    /// Never fails. A refiner error, timeout or inconsistent answer yields the
    /// input clusters and an issue describing why.
    pub async fn refine(&self, clusters: Vec<Cluster>) -> Refinement {
        let items = items(&clusters);
        if items.len() < 2 {
            return Refinement::unchanged(clusters, None);
        }

        let raw = match tokio::time::timeout(self.timeout, self.refiner.group(&items)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return skipped(clusters, e),
            Err(_) => {
                let e = AloeError::RefinementFailed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ));
                return skipped(clusters, e);
            }
        };

        match apply_groups(&clusters, &raw) {
            Ok((refined, merged)) => {
                tracing::debug!(before = clusters.len(), after = refined.len(), merged, "clusters refined");
                Refinement {
                    clusters: refined,
                    merged,
                    issue: None,
                }
            }
            Err(e) => skipped(clusters, e),
        }
    }
}

fn skipped(clusters: Vec<Cluster>, err: AloeError) -> Refinement {
    tracing::warn!(error = %err, "cluster refinement skipped; keeping clusters as built");
    let issue = Issue::from_error("clusters", &err);
    Refinement::unchanged(clusters, Some(issue))
}

/// Every cluster except the unclassifiable bucket, indexed by position.
pub fn items(clusters: &[Cluster]) -> Vec<RefineItem> {
    clusters
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_unclassifiable())
        .map(|(idx, c)| RefineItem {
            idx,
            service: c.service.clone(),
            class: c.class.clone(),
            pattern: c.pattern.clone(),
            message: c.representative.message.clone(),
            count: c.size,
        })
        .collect()
}

/// Fold clusters according to a refiner answer.
///
/// The canonical cluster keeps its signature, pattern and representative, so
/// feedback recorded against it still applies. Absorbed clusters contribute
/// their members and are listed in `merged_from`. Indices the answer leaves
/// out stay as they are. Returns the new clusters and how many were absorbed.
pub fn apply_groups(clusters: &[Cluster], raw: &Value) -> Result<(Vec<Cluster>, usize), AloeError> {
    let invalid = |msg: String| AloeError::RefinementFailed(msg);
    let groups = raw
        .get("groups")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("answer has no \"groups\" list".into()))?;

    let mergeable: HashSet<usize> = items(clusters).iter().map(|i| i.idx).collect();
    let mut seen = HashSet::new();
    // canonical idx -> absorbed idxs, in answer order
    let mut folds: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (g, group) in groups.iter().enumerate() {
        let canonical = group
            .get("canonical_idx")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid(format!("groups[{g}]: canonical_idx must be an index")))?
            as usize;
        let members = group
            .get("member_idxs")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(format!("groups[{g}]: member_idxs must be a list")))?;

        let mut idxs = Vec::with_capacity(members.len());
        for m in members {
            let idx = m
                .as_u64()
                .ok_or_else(|| invalid(format!("groups[{g}]: member {m} is not an index")))?
                as usize;
            if !mergeable.contains(&idx) {
                return Err(invalid(format!("groups[{g}]: unknown cluster index {idx}")));
            }
            if !seen.insert(idx) {
                return Err(invalid(format!("cluster index {idx} appears in more than one group")));
            }
            idxs.push(idx);
        }
        if !idxs.contains(&canonical) {
            return Err(invalid(format!(
                "groups[{g}]: canonical_idx {canonical} is not one of its members"
            )));
        }
        idxs.retain(|i| *i != canonical);
        if !idxs.is_empty() {
            folds.insert(canonical, idxs);
        }
    }

    let absorbed: HashSet<usize> = folds.values().flatten().copied().collect();
    let mut out = Vec::with_capacity(clusters.len() - absorbed.len());
    for (idx, cluster) in clusters.iter().enumerate() {
        if absorbed.contains(&idx) {
            continue;
        }
        let mut merged = cluster.clone();
        for other in folds.get(&idx).into_iter().flatten().map(|i| &clusters[*i]) {
            merged.members.extend(other.members.iter().cloned());
            merged.size += other.size;
            merged.merged_from.push(other.signature.clone());
            merged.merged_from.extend(other.merged_from.iter().cloned());
        }
        out.push(merged);
    }
    out.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.signature.cmp(&b.signature)));
    Ok((out, absorbed.len()))
}

/// Scripted refiner (for testing).
pub struct MockRefiner {
    response: Result<Value, String>,
    calls: AtomicUsize,
}

impl MockRefiner {
    pub fn returning(value: Value) -> Self {
        Self {
            response: Ok(value),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterRefiner for MockRefiner {
    async fn group(&self, _items: &[RefineItem]) -> Result<Value, AloeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone().map_err(AloeError::RefinementFailed)
    }
}
