use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Well-known artifact file names inside a run directory.
pub mod artifact {
    pub const CLUSTERS: &str = "clusters.json";
    pub const TRIAGE: &str = "triage.json";
    pub const SUMMARY: &str = "summary.json";
    pub const PLAN: &str = "plan.json";
    pub const RESULTS: &str = "results.json";
    pub const MANIFEST: &str = "manifest.json";
    pub const EVENTS: &str = "events.jsonl";
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

/// File-based lock guard. Released on drop.
pub struct LockGuard {
    _file: fs::File,
}

fn open_lock(path: &Path) -> anyhow::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    Ok(file)
}

/// Acquire an exclusive file lock, blocking until available.
pub fn lock_file(path: &Path) -> anyhow::Result<LockGuard> {
    let file = open_lock(path)?;
    file.lock_exclusive()?;
    Ok(LockGuard { _file: file })
}

/// Acquire a shared (reader) file lock, blocking while a writer holds it.
pub fn lock_file_shared(path: &Path) -> anyhow::Result<LockGuard> {
    let file = open_lock(path)?;
    file.lock_shared()?;
    Ok(LockGuard { _file: file })
}

// ── Run artifacts ──

/// Root of all per-run directories (`.aloe/runs/`).
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create (or reopen) the directory for `run_id`.
    pub fn open_run(&self, run_id: &str) -> anyhow::Result<RunDir> {
        let path = self.root.join(run_id);
        fs::create_dir_all(&path)?;
        Ok(RunDir {
            run_id: run_id.to_string(),
            path,
        })
    }

    /// Existing run directory, if any.
    pub fn get(&self, run_id: &str) -> Option<RunDir> {
        let path = self.root.join(run_id);
        path.is_dir().then(|| RunDir {
            run_id: run_id.to_string(),
            path,
        })
    }

    /// Run ids in creation order (ULID ids sort chronologically).
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn latest(&self) -> anyhow::Result<Option<RunDir>> {
        Ok(self.list()?.last().and_then(|id| self.get(id)))
    }
}

/// One run's artifact directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub run_id: String,
    pub path: PathBuf,
}

impl RunDir {
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        write_json_atomic(&self.artifact_path(name), value)?;
        tracing::debug!(run_id = %self.run_id, artifact = name, "saved artifact");
        Ok(())
    }

    /// Load an artifact; `None` when it was never written.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        let path = self.artifact_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("corrupt artifact {}: {e}", path.display()))?;
        Ok(Some(value))
    }
}
