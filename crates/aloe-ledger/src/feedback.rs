use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aloe_core::{AloeError, Decision, FeedbackEntry, Label, Severity, Triage};
use serde::{Deserialize, Serialize};

use crate::paths::AloePaths;

/// Append-only store of human decisions, keyed by cluster signature.
///
/// Writes are serialized twice: by an in-process mutex and by an exclusive
/// lock on `feedback/LOCK` for other processes. Readers take the same lock
/// shared, so they never observe a half-written line.
pub struct FeedbackStore {
    path: PathBuf,
    lock_path: PathBuf,
    fsync: bool,
    writer: Mutex<()>,
}

impl FeedbackStore {
    pub fn open(paths: &AloePaths) -> Result<Self, AloeError> {
        std::fs::create_dir_all(&paths.feedback_dir)?;
        Ok(Self::at(&paths.feedback_jsonl, &paths.feedback_lock))
    }

    pub fn at(path: &Path, lock_path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock_path: lock_path.to_path_buf(),
            fsync: true,
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Prior entries are never rewritten.
    ///
    /// Rejected with `FeedbackWriteConflict` when the entry id already exists
    /// or when a newer decision for the same signature is already stored.
    pub fn append(&self, entry: &FeedbackEntry) -> Result<(), AloeError> {
        let _local = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let _file_lock = aloe_store::lock_file(&self.lock_path).map_err(store_err)?;

        let existing = self.read_unlocked()?;
        if existing.iter().any(|e| e.entry_id == entry.entry_id) {
            return Err(conflict(entry, "entry id already recorded"));
        }
        if let Some(latest) = latest_of(&existing, &entry.cluster_signature) {
            if latest.decided_at > entry.decided_at {
                return Err(conflict(entry, "a newer decision is already recorded"));
            }
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        if self.fsync {
            file.sync_all()?;
        }
        tracing::info!(
            signature = %entry.cluster_signature,
            decision = entry.decision.as_str(),
            "feedback recorded"
        );
        Ok(())
    }

    /// All entries in write order.
    pub fn entries(&self) -> Result<Vec<FeedbackEntry>, AloeError> {
        let _shared = aloe_store::lock_file_shared(&self.lock_path).map_err(store_err)?;
        self.read_unlocked()
    }

    /// Every entry for one signature, in write order.
    pub fn history(&self, signature: &str) -> Result<Vec<FeedbackEntry>, AloeError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.cluster_signature == signature)
            .collect())
    }

    /// The effective decision for `signature`.
    pub fn latest(&self, signature: &str) -> Result<Option<FeedbackEntry>, AloeError> {
        Ok(latest_of(&self.entries()?, signature).cloned())
    }

    /// Effective decision for every signature, read once.
    pub fn snapshot(&self) -> Result<FeedbackSnapshot, AloeError> {
        Ok(FeedbackSnapshot::from_entries(self.entries()?))
    }

    fn read_unlocked(&self) -> Result<Vec<FeedbackEntry>, AloeError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = std::io::BufReader::new(file);
        let mut entries = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: FeedbackEntry = serde_json::from_str(&line).map_err(|e| {
                AloeError::Store(format!(
                    "corrupt feedback entry at {}:{}: {e}",
                    self.path.display(),
                    n + 1
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Greatest `decided_at` wins; on equal instants the later line wins.
fn latest_of<'a>(entries: &'a [FeedbackEntry], signature: &str) -> Option<&'a FeedbackEntry> {
    entries
        .iter()
        .filter(|e| e.cluster_signature == signature)
        .fold(None, |best: Option<&FeedbackEntry>, e| match best {
            Some(b) if b.decided_at > e.decided_at => Some(b),
            _ => Some(e),
        })
}

fn conflict(entry: &FeedbackEntry, message: &str) -> AloeError {
    AloeError::FeedbackWriteConflict {
        signature: entry.cluster_signature.clone(),
        message: message.to_string(),
    }
}

fn store_err(e: anyhow::Error) -> AloeError {
    AloeError::Store(format!("{e:#}"))
}

// ── Snapshot ──

/// Point-in-time view of the effective decision per signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSnapshot {
    latest: HashMap<String, FeedbackEntry>,
}

impl FeedbackSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = FeedbackEntry>) -> Self {
        let mut latest: HashMap<String, FeedbackEntry> = HashMap::new();
        for e in entries {
            match latest.get(&e.cluster_signature) {
                Some(cur) if cur.decided_at > e.decided_at => {}
                _ => {
                    latest.insert(e.cluster_signature.clone(), e);
                }
            }
        }
        Self { latest }
    }

    pub fn get(&self, signature: &str) -> Option<&FeedbackEntry> {
        self.latest.get(signature)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedbackEntry> {
        self.latest.values()
    }

    /// True when the latest decision for the triage's signature is a
    /// rejection and the triage still carries the label and severity the
    /// reviewer saw. A snapshot field that was never recorded counts as
    /// unchanged.
    pub fn blocks_drafting(&self, triage: &Triage) -> bool {
        let Some(entry) = self.get(&triage.cluster_signature) else {
            return false;
        };
        if entry.decision != Decision::Rejected {
            return false;
        }
        same(entry.label, triage.label()) && same(entry.severity, triage.severity())
    }

    /// Compact per-signature view handed to decision sources.
    pub fn digest(&self) -> Vec<FeedbackDigest> {
        let mut out: Vec<FeedbackDigest> = self
            .latest
            .values()
            .map(|e| FeedbackDigest {
                cluster_signature: e.cluster_signature.clone(),
                decision: e.decision,
                label: e.label,
                severity: e.severity,
            })
            .collect();
        out.sort_by(|a, b| a.cluster_signature.cmp(&b.cluster_signature));
        out
    }
}

fn same<T: PartialEq>(recorded: Option<T>, current: Option<T>) -> bool {
    match recorded {
        None => true,
        Some(r) => current == Some(r),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackDigest {
    pub cluster_signature: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aloe_core::{Extracted, TriageStatus, Verdict};
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};

    fn store() -> (tempfile::TempDir, FeedbackStore) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AloePaths::discover(tmp.path());
        let store = FeedbackStore::open(&paths).unwrap();
        (tmp, store)
    }

    fn entry(sig: &str, decision: Decision, at: i64) -> FeedbackEntry {
        let mut e = FeedbackEntry::new(sig, decision, "draft");
        e.decided_at = OffsetDateTime::from_unix_timestamp(at).unwrap();
        e
    }

    fn triage(sig: &str, label: Label, severity: Severity) -> Triage {
        Triage {
            cluster_signature: sig.into(),
            cluster_index: 0,
            size: 1,
            status: TriageStatus::Ok,
            verdict: Some(Verdict {
                label,
                severity,
                priority: Severity::High,
                confidence: 0.8,
                reason: String::new(),
            }),
            extracted: Extracted::default(),
            error: None,
        }
    }

    #[test]
    fn empty_store_reads_empty() {
        let (_tmp, s) = store();
        assert!(s.entries().unwrap().is_empty());
        assert!(s.latest("abc").unwrap().is_none());
        assert!(s.snapshot().unwrap().is_empty());
    }

    #[test]
    fn latest_supersedes_history_kept() {
        let (_tmp, s) = store();
        s.append(&entry("abc", Decision::Rejected, 100)).unwrap();
        s.append(&entry("abc", Decision::Approved, 200)).unwrap();
        s.append(&entry("other", Decision::Skipped, 150)).unwrap();

        assert_eq!(s.history("abc").unwrap().len(), 2);
        assert_eq!(s.latest("abc").unwrap().unwrap().decision, Decision::Approved);
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("abc").unwrap().decision, Decision::Approved);
    }

    #[test]
    fn equal_instants_prefer_later_line() {
        let (_tmp, s) = store();
        s.append(&entry("abc", Decision::Approved, 100)).unwrap();
        s.append(&entry("abc", Decision::Rejected, 100)).unwrap();
        assert_eq!(s.latest("abc").unwrap().unwrap().decision, Decision::Rejected);
        assert_eq!(
            s.snapshot().unwrap().get("abc").unwrap().decision,
            Decision::Rejected
        );
    }

    #[test]
    fn duplicate_id_conflicts() {
        let (_tmp, s) = store();
        let e = entry("abc", Decision::Rejected, 100);
        s.append(&e).unwrap();
        let err = s.append(&e).unwrap_err();
        assert!(matches!(err, AloeError::FeedbackWriteConflict { .. }));
        assert_eq!(s.entries().unwrap().len(), 1);
    }

    #[test]
    fn stale_write_conflicts_only_for_that_signature() {
        let (_tmp, s) = store();
        s.append(&entry("abc", Decision::Approved, 200)).unwrap();
        let err = s.append(&entry("abc", Decision::Rejected, 100)).unwrap_err();
        assert!(matches!(err, AloeError::FeedbackWriteConflict { .. }));
        s.append(&entry("xyz", Decision::Rejected, 100)).unwrap();
        assert_eq!(s.entries().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_line_is_fatal() {
        let (_tmp, s) = store();
        s.append(&entry("abc", Decision::Approved, 1)).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(s.path()).unwrap();
        writeln!(f, "{{not json").unwrap();
        let err = s.entries().unwrap_err();
        assert!(matches!(err, AloeError::Store(_)));
        assert!(err.to_string().contains(":2"));
    }

    #[test]
    fn concurrent_appends_all_land() {
        let (_tmp, s) = store();
        let s = Arc::new(s);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let e = FeedbackEntry::new(format!("sig{t}_{i}"), Decision::Approved, "d");
                        s.append(&e).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.entries().unwrap().len(), 80);
    }

    #[test]
    fn rejection_blocks_until_triage_changes() {
        let mut rejected = entry("abc123", Decision::Rejected, 100);
        rejected.label = Some(Label::InternalError);
        rejected.severity = Some(Severity::High);
        let snap = FeedbackSnapshot::from_entries([rejected]);

        assert!(snap.blocks_drafting(&triage("abc123", Label::InternalError, Severity::High)));
        assert!(!snap.blocks_drafting(&triage("abc123", Label::Timeout, Severity::High)));
        assert!(!snap.blocks_drafting(&triage("abc123", Label::InternalError, Severity::Low)));
        assert!(!snap.blocks_drafting(&triage("other", Label::InternalError, Severity::High)));
    }

    #[test]
    fn rejection_without_snapshot_fields_blocks() {
        let snap = FeedbackSnapshot::from_entries([entry("abc", Decision::Rejected, 1)]);
        assert!(snap.blocks_drafting(&triage("abc", Label::Timeout, Severity::Low)));
    }

    #[test]
    fn later_approval_lifts_block() {
        let base = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        let mut r = entry("abc", Decision::Rejected, 0);
        r.decided_at = base;
        let mut a = entry("abc", Decision::Approved, 0);
        a.decided_at = base + Duration::seconds(5);
        let snap = FeedbackSnapshot::from_entries([a, r]);
        assert!(!snap.blocks_drafting(&triage("abc", Label::InternalError, Severity::High)));
        assert_eq!(snap.digest().len(), 1);
    }
}
