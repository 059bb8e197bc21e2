//! Human review of drafted tickets.
//!
//! Drafts are presented one at a time. Every answer except skip-all is
//! written to the feedback store, and approved drafts become tickets.

use aloe_core::{AloeError, Decision, FeedbackEntry, Issue, Triage};
use aloe_ledger::FeedbackStore;
use serde::Serialize;

use crate::agent::external::TicketSink;
use crate::agent::outputs::TicketDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewChoice {
    Approve,
    Reject,
    Skip,
    /// Stop reviewing; remaining drafts get no decision.
    SkipAll,
}

impl ReviewChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "a" | "approve" => Some(Self::Approve),
            "r" | "reject" => Some(Self::Reject),
            "s" | "skip" => Some(Self::Skip),
            "x" | "skip-all" | "skip_all" => Some(Self::SkipAll),
            _ => None,
        }
    }
}

/// Asks a human about one draft.
pub trait ReviewPrompt: Send {
    fn ask(&mut self, index: usize, total: usize, draft: &TicketDraft) -> anyhow::Result<ReviewChoice>;
}

/// Pre-recorded answers (for testing). Runs out as `SkipAll`.
pub struct ScriptedPrompt {
    answers: std::collections::VecDeque<ReviewChoice>,
    pub asked: usize,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = ReviewChoice>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: 0,
        }
    }
}

impl ReviewPrompt for ScriptedPrompt {
    fn ask(&mut self, _index: usize, _total: usize, _draft: &TicketDraft) -> anyhow::Result<ReviewChoice> {
        self.asked += 1;
        Ok(self.answers.pop_front().unwrap_or(ReviewChoice::SkipAll))
    }
}

/// A ticket created for an approved draft.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedTicket {
    pub cluster_signature: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewOutcome {
    pub approved: usize,
    pub rejected: usize,
    pub skipped: usize,
    /// True when the reviewer stopped before the last draft.
    pub halted: bool,
    /// Approvals left unrecorded because the ticket could not be created.
    pub ticket_failures: usize,
    pub created: Vec<CreatedTicket>,
    pub issues: Vec<Issue>,
}

/// Run a review session over `drafts`.
///
/// Ticket failures and feedback write conflicts are recorded as issues and
/// the session continues. An approval whose ticket could not be created is
/// not written to the feedback store, so the draft comes up again next run.
/// Other store errors end the session.
pub async fn review_drafts(
    run_id: &str,
    drafts: &[TicketDraft],
    triages: &[Triage],
    prompt: &mut dyn ReviewPrompt,
    feedback: &FeedbackStore,
    tickets: &dyn TicketSink,
) -> anyhow::Result<ReviewOutcome> {
    let mut outcome = ReviewOutcome::default();
    let total = drafts.len();

    for (i, draft) in drafts.iter().enumerate() {
        let choice = prompt.ask(i, total, draft)?;
        let decision = match choice {
            ReviewChoice::SkipAll => {
                outcome.halted = true;
                tracing::info!(reviewed = i, total, "review halted");
                break;
            }
            ReviewChoice::Approve => Decision::Approved,
            ReviewChoice::Reject => Decision::Rejected,
            ReviewChoice::Skip => Decision::Skipped,
        };

        if decision == Decision::Approved {
            match tickets.create(draft).await {
                Ok(key) => {
                    tracing::info!(signature = %draft.cluster_signature, key = %key, "ticket created");
                    outcome.created.push(CreatedTicket {
                        cluster_signature: draft.cluster_signature.clone(),
                        key,
                    });
                }
                Err(e) => {
                    tracing::warn!(signature = %draft.cluster_signature, error = %e, "ticket creation failed");
                    outcome.issues.push(Issue::from_error(&draft.cluster_signature, &e));
                    outcome.ticket_failures += 1;
                    continue;
                }
            }
        }

        let mut entry = FeedbackEntry::new(&draft.cluster_signature, decision, draft.snapshot_text());
        entry.source = Some(format!("review:{run_id}"));
        entry = match triages.iter().find(|t| t.cluster_signature == draft.cluster_signature) {
            Some(t) => entry.with_triage(t),
            None => {
                entry.label = draft.label;
                entry.severity = draft.severity;
                entry.service = Some(draft.service.clone());
                entry
            }
        };

        match feedback.append(&entry) {
            Ok(()) => {}
            Err(e @ AloeError::FeedbackWriteConflict { .. }) => {
                tracing::warn!(signature = %draft.cluster_signature, error = %e, "feedback not recorded");
                outcome.issues.push(Issue::from_error(&draft.cluster_signature, &e));
                continue;
            }
            Err(e) => return Err(anyhow::Error::new(e).context("record feedback")),
        }

        match decision {
            Decision::Approved => outcome.approved += 1,
            Decision::Rejected => outcome.rejected += 1,
            Decision::Skipped => outcome.skipped += 1,
        }
    }

    Ok(outcome)
}
