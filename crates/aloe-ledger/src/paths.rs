use std::path::{Path, PathBuf};

/// All well-known paths under `.aloe/`.
#[derive(Debug, Clone)]
pub struct AloePaths {
    pub root: PathBuf,
    pub aloe_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub feedback_jsonl: PathBuf,
    pub feedback_lock: PathBuf,
    pub runs_dir: PathBuf,
    pub lock_file: PathBuf,
    pub config_json: PathBuf,
}

impl AloePaths {
    /// Derive all paths from a workspace root. Pure computation, no I/O.
    pub fn discover(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let aloe_dir = root.join(".aloe");
        let feedback_dir = aloe_dir.join("feedback");
        Self {
            feedback_jsonl: feedback_dir.join("feedback.jsonl"),
            feedback_lock: feedback_dir.join("LOCK"),
            runs_dir: aloe_dir.join("runs"),
            lock_file: aloe_dir.join("LOCK"),
            config_json: aloe_dir.join("config.json"),
            feedback_dir,
            aloe_dir,
            root,
        }
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [&self.aloe_dir, &self.feedback_dir, &self.runs_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.aloe_dir.is_dir()
    }

    /// Walk up from `start` looking for a directory containing `.aloe/`.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut cur = start.to_path_buf();
        loop {
            if cur.join(".aloe").is_dir() {
                return Some(cur);
            }
            if !cur.pop() {
                return None;
            }
        }
    }
}
