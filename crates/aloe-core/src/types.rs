use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Reserved signature for records whose masked pattern carries no content.
pub const UNCLASSIFIABLE_SIGNATURE: &str = "unclassifiable";

/// Number of leading lines kept in a stack excerpt.
pub const STACK_EXCERPT_LINES: usize = 15;

// ── Logs ──

/// Normalized severity level of a single log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    #[default]
    Unknown,
}

impl LogLevel {
    /// Lenient parse; anything unrecognised maps to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" | "finest" | "finer" => Self::Trace,
            "debug" | "fine" => Self::Debug,
            "info" | "information" | "notice" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" | "err" | "severe" => Self::Error,
            "fatal" | "critical" | "crit" | "panic" => Self::Fatal,
            _ => Self::Unknown,
        }
    }
}

/// A canonical log record. Immutable once produced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub service: String,
    pub class: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Full raw log text (often a multi-line stack trace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogRecord {
    /// First [`STACK_EXCERPT_LINES`] lines of the stack, or of the message
    /// when no stack was captured.
    pub fn stack_excerpt(&self) -> String {
        let text = self.stack.as_deref().unwrap_or(&self.message);
        text.lines()
            .take(STACK_EXCERPT_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Clusters ──

/// A group of records sharing one signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub signature: String,
    pub pattern: String,
    pub service: String,
    pub class: String,
    pub members: Vec<LogRecord>,
    pub representative: LogRecord,
    pub size: usize,
    /// Signatures of clusters folded into this one by refinement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
}

impl Cluster {
    pub fn is_unclassifiable(&self) -> bool {
        self.signature == UNCLASSIFIABLE_SIGNATURE
    }
}

// ── Triage ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    InternalError,
    Timeout,
    Noise,
    ExternalService,
}

impl Label {
    pub const ALL: [Label; 4] = [
        Label::InternalError,
        Label::Timeout,
        Label::Noise,
        Label::ExternalService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalError => "internal_error",
            Self::Timeout => "timeout",
            Self::Noise => "noise",
            Self::ExternalService => "external_service",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == raw)
    }
}

/// Ordered low < medium < high, so thresholds compare directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Priority shares the low/medium/high scale with severity.
pub type Priority = Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    Ok,
    TriageFailed,
}

/// Validated classification verdict for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub label: Label,
    pub severity: Severity,
    pub priority: Priority,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Extracted {
    pub service: String,
    pub class: String,
    pub stack_excerpt: String,
}

/// Classification outcome for one cluster in one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Triage {
    pub cluster_signature: String,
    pub cluster_index: usize,
    pub size: usize,
    pub status: TriageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub extracted: Extracted,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Triage {
    pub fn ok(cluster_index: usize, cluster: &Cluster, verdict: Verdict) -> Self {
        Self {
            cluster_signature: cluster.signature.clone(),
            cluster_index,
            size: cluster.size,
            status: TriageStatus::Ok,
            verdict: Some(verdict),
            extracted: extracted_from(cluster),
            error: None,
        }
    }

    pub fn failed(cluster_index: usize, cluster: &Cluster, error: impl Into<String>) -> Self {
        Self {
            cluster_signature: cluster.signature.clone(),
            cluster_index,
            size: cluster.size,
            status: TriageStatus::TriageFailed,
            verdict: None,
            extracted: extracted_from(cluster),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TriageStatus::Ok && self.verdict.is_some()
    }

    pub fn label(&self) -> Option<Label> {
        self.verdict.as_ref().map(|v| v.label)
    }

    pub fn severity(&self) -> Option<Severity> {
        self.verdict.as_ref().map(|v| v.severity)
    }

    pub fn priority(&self) -> Option<Priority> {
        self.verdict.as_ref().map(|v| v.priority)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.verdict.as_ref().map(|v| v.confidence)
    }
}

fn extracted_from(cluster: &Cluster) -> Extracted {
    Extracted {
        service: cluster.service.clone(),
        class: cluster.class.clone(),
        stack_excerpt: cluster.representative.stack_excerpt(),
    }
}

// ── Summary ──

/// Run-level aggregate over all triages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub log_count: usize,
    pub dropped_record_count: usize,
    pub cluster_count: usize,
    pub triaged_cluster_count: usize,
    pub failed_cluster_count: usize,
    pub by_label: BTreeMap<Label, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub internal_high_count: usize,
    pub has_noise: bool,
    pub has_external: bool,
}

// ── Feedback ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Skipped,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }
}

/// One human decision about a drafted action for a cluster signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEntry {
    pub entry_id: String,
    pub cluster_signature: String,
    pub decision: Decision,
    pub draft_snapshot: String,
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
    /// Triage label the reviewer saw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    /// Triage severity the reviewer saw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl FeedbackEntry {
    /// New entry stamped with a fresh `fb_<ulid>` id and the current time.
    pub fn new(
        cluster_signature: impl Into<String>,
        decision: Decision,
        draft_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: new_feedback_id(),
            cluster_signature: cluster_signature.into(),
            decision,
            draft_snapshot: draft_snapshot.into(),
            decided_at: OffsetDateTime::now_utc(),
            label: None,
            severity: None,
            service: None,
            source: None,
        }
    }

    /// Record the triage the reviewer was looking at.
    pub fn with_triage(mut self, triage: &Triage) -> Self {
        self.label = triage.label();
        self.severity = triage.severity();
        self.service = Some(triage.extracted.service.clone());
        self
    }
}

pub fn new_feedback_id() -> String {
    format!("fb_{}", ulid::Ulid::new())
}

pub fn new_run_id() -> String {
    format!("run_{}", ulid::Ulid::new())
}
