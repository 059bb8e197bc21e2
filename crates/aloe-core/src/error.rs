use serde::{Deserialize, Serialize};

/// Domain errors raised across the pipeline.
///
/// Each variant carries its own recovery scope: record-level and
/// cluster-level errors are absorbed and surfaced in run output, while
/// `Store`, `Io` and `Json` are fatal to the operation that hit them.
#[derive(Debug, thiserror::Error)]
pub enum AloeError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("classification response failed validation: {0}")]
    ClassificationSchemaInvalid(String),

    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("decision unavailable: {0}")]
    DecisionUnavailable(String),

    #[error("decision failed validation: {0}")]
    DecisionSchemaInvalid(String),

    #[error("cluster refinement skipped: {0}")]
    RefinementFailed(String),

    #[error("action {action} failed: {message}")]
    ActionExecutionFailed { action: String, message: String },

    #[error("feedback write conflict for {signature}: {message}")]
    FeedbackWriteConflict { signature: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AloeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRecord(_) => ErrorKind::MalformedRecord,
            Self::ClassificationSchemaInvalid(_) => ErrorKind::ClassificationSchemaInvalid,
            Self::ClassificationUnavailable(_) => ErrorKind::ClassificationUnavailable,
            Self::DecisionUnavailable(_) => ErrorKind::DecisionUnavailable,
            Self::DecisionSchemaInvalid(_) => ErrorKind::DecisionSchemaInvalid,
            Self::RefinementFailed(_) => ErrorKind::RefinementFailed,
            Self::ActionExecutionFailed { .. } => ErrorKind::ActionExecutionFailed,
            Self::FeedbackWriteConflict { .. } => ErrorKind::FeedbackWriteConflict,
            Self::Config(_) => ErrorKind::Config,
            Self::Store(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Store,
        }
    }

    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ClassificationUnavailable(_) | Self::DecisionUnavailable(_)
        )
    }

    pub fn action_failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionExecutionFailed {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Serializable error category, used when errors are surfaced in run output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedRecord,
    ClassificationSchemaInvalid,
    ClassificationUnavailable,
    DecisionUnavailable,
    DecisionSchemaInvalid,
    RefinementFailed,
    ActionExecutionFailed,
    FeedbackWriteConflict,
    Config,
    Store,
}

/// A recoverable error that was absorbed during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub kind: ErrorKind,
    /// What the issue is about: a record index, a signature or an action name.
    pub subject: String,
    pub message: String,
}

impl Issue {
    pub fn from_error(subject: impl Into<String>, err: &AloeError) -> Self {
        Self {
            kind: err.kind(),
            subject: subject.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        let e = AloeError::ClassificationSchemaInvalid("label".into());
        assert_eq!(e.kind(), ErrorKind::ClassificationSchemaInvalid);
        let io = AloeError::from(std::io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Store);
    }

    #[test]
    fn only_unavailability_is_transient() {
        assert!(AloeError::ClassificationUnavailable("429".into()).is_transient());
        assert!(!AloeError::ClassificationSchemaInvalid("bad".into()).is_transient());
        assert!(!AloeError::action_failed("JiraDrafts", "boom").is_transient());
    }

    #[test]
    fn issue_keeps_display_text() {
        let e = AloeError::action_failed("JiraDrafts", "boom");
        let issue = Issue::from_error("JiraDrafts", &e);
        assert_eq!(issue.kind, ErrorKind::ActionExecutionFailed);
        assert_eq!(issue.message, "action JiraDrafts failed: boom");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "action_execution_failed");
    }
}
