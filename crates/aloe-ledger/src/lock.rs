use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::paths::AloePaths;

/// Who holds the workspace lock. Written into `.aloe/LOCK` once the lock is
/// taken so a second command can say what it is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockHolder {
    /// Command that took the lock, e.g. `run` or `review`.
    pub command: String,
    pub pid: u32,
    pub acquired_at: String,
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`aloe {}` (pid {}, since {})",
            self.command, self.pid, self.acquired_at
        )
    }
}

/// Exclusive lock over one `.aloe/` workspace, held by `run` and `review`
/// so two commands never interleave artifacts or feedback decisions.
/// Released when dropped.
pub struct WorkspaceLock {
    _file: File,
    holder: LockHolder,
}

impl WorkspaceLock {
    /// Take the lock for `command` without blocking. Fails with the current
    /// holder's details when another command has it.
    pub fn acquire(paths: &AloePaths, command: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&paths.aloe_dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&paths.lock_file)
            .map_err(|e| {
                anyhow::anyhow!(
                    "cannot open workspace lock {} for `aloe {command}`: {e}",
                    paths.lock_file.display()
                )
            })?;

        if file.try_lock_exclusive().is_err() {
            let held_by = read_holder(&mut file)
                .map(|h| h.to_string())
                .unwrap_or_else(|| "another aloe command".to_string());
            anyhow::bail!(
                "cannot start `aloe {command}`: workspace {} is busy, {held_by} holds {}",
                paths.root.display(),
                paths.lock_file.display()
            );
        }

        let holder = LockHolder {
            command: command.to_string(),
            pid: std::process::id(),
            acquired_at: aloe_core::now_rfc3339(),
        };
        if let Err(e) = write_holder(&mut file, &holder) {
            tracing::warn!(error = %e, "could not record workspace lock holder");
        }
        tracing::debug!(command, lock = %paths.lock_file.display(), "workspace lock acquired");
        Ok(Self {
            _file: file,
            holder,
        })
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    serde_json::from_str(text.trim()).ok()
}

fn write_holder(file: &mut File, holder: &LockHolder) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    let line = serde_json::to_string(holder).map_err(std::io::Error::other)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}
