//! Structured audit log for pipeline runs.
//!
//! Writes append-only JSONL to `.aloe/runs/{run_id}/events.jsonl`.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Event types ──

/// A run event. Serialized as tagged JSON (`"type": "run_start"`, etc.).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        run_id: String,
        source: String,
    },
    RecordsNormalized {
        kept: usize,
        dropped: usize,
    },
    ClustersBuilt {
        cluster_count: usize,
    },
    ClustersRefined {
        before: usize,
        after: usize,
    },
    TriageFailed {
        signature: String,
        error: String,
    },
    TriageCompleted {
        ok: usize,
        failed: usize,
    },
    PlanReady {
        source: String,
        reason: String,
        runnable: Vec<String>,
    },
    ActionStart {
        action: String,
    },
    ActionOk {
        action: String,
        duration_ms: u64,
    },
    ActionFailed {
        action: String,
        duration_ms: u64,
        error: String,
    },
    ActionSkipped {
        action: String,
        reason: String,
    },
    RunCompleted {
        ok: usize,
        failed: usize,
        skipped: usize,
    },
    RunStopped {
        reason: String,
    },
}

/// Wrapper that adds sequence number and timestamp to each event.
#[derive(Debug, Serialize)]
pub struct FullEvent {
    pub seq: u32,
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

// ── EventLogger ──

/// Append-only JSONL event writer.
pub struct EventLogger {
    jsonl_path: Option<PathBuf>,
    seq: u32,
    stdout_json: bool,
}

impl EventLogger {
    pub fn new(jsonl_path: impl Into<PathBuf>) -> Self {
        Self {
            jsonl_path: Some(jsonl_path.into()),
            seq: 0,
            stdout_json: false,
        }
    }

    /// A logger that writes nowhere (unless stdout mirroring is on).
    pub fn disabled() -> Self {
        Self {
            jsonl_path: None,
            seq: 0,
            stdout_json: false,
        }
    }

    /// Also print every event as one JSON line on stdout.
    pub fn with_stdout_json(mut self, on: bool) -> Self {
        self.stdout_json = on;
        self
    }

    /// Record an event. Best-effort: write failures are logged, never raised.
    pub fn record(&mut self, event: Event) {
        let full = FullEvent {
            seq: self.seq,
            ts: aloe_core::now_rfc3339(),
            event,
        };
        self.seq += 1;

        let Ok(line) = serde_json::to_string(&full) else {
            return;
        };
        if self.stdout_json {
            println!("{line}");
        }
        if let Some(path) = &self.jsonl_path {
            if let Err(e) = append_line(path, &line) {
                tracing::warn!(path = %path.display(), error = %e, "event log write failed");
            }
        }
    }

    pub fn recorded(&self) -> u32 {
        self.seq
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sequenced_tagged_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_1").join("events.jsonl");
        let mut log = EventLogger::new(&path);
        log.record(Event::RunStart {
            run_id: "run_1".into(),
            source: "static".into(),
        });
        log.record(Event::ActionSkipped {
            action: "JiraDrafts".into(),
            reason: "run=false".into(),
        });

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "run_start");
        assert_eq!(lines[0]["seq"], 0);
        assert_eq!(lines[1]["type"], "action_skipped");
        assert_eq!(lines[1]["seq"], 1);
        assert!(lines[1]["ts"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn disabled_logger_still_counts() {
        let mut log = EventLogger::disabled();
        log.record(Event::RunStopped {
            reason: "no_logs".into(),
        });
        assert_eq!(log.recorded(), 1);
    }
}
