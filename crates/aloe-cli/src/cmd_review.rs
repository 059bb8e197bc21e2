use std::io::{BufRead, Write};

use aloe_agents::JiraClient;
use aloe_conductor::agent::outputs::TicketDraft;
use aloe_conductor::pipeline::{load_drafts, load_triages};
use aloe_conductor::review::{review_drafts, ReviewChoice, ReviewPrompt};
use aloe_ledger::{FeedbackStore, WorkspaceLock};
use aloe_store::RunStore;
use anyhow::{Context, Result};

use crate::workspace::Workspace;

const REVIEW_ARTIFACT: &str = "review.json";
const DESCRIPTION_LINES: usize = 8;

/// Execute `aloe review [--run <id>]`.
pub fn execute(ws: &Workspace, run: Option<&str>) -> Result<()> {
    let _lock = WorkspaceLock::acquire(&ws.paths, "review")?;
    let runs = RunStore::new(ws.paths.runs_dir.clone());
    let dir = match run {
        Some(id) => runs.get(id).with_context(|| format!("run {id} not found"))?,
        None => runs.latest()?.context("no runs yet; try `aloe run` first")?,
    };

    let drafts = load_drafts(&dir)?;
    if drafts.is_empty() {
        println!("Run {} has no ticket drafts to review.", dir.run_id);
        return Ok(());
    }
    let triages = load_triages(&dir)?;
    let feedback = FeedbackStore::open(&ws.paths)?;
    let tickets = JiraClient::from_config(&ws.config.jira)?;

    println!("Reviewing {} drafts from run {}", drafts.len(), dir.run_id);
    let mut prompt = TermPrompt::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout());

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(review_drafts(
        &dir.run_id,
        &drafts,
        &triages,
        &mut prompt,
        &feedback,
        &tickets,
    ))?;
    dir.save(REVIEW_ARTIFACT, &outcome)?;

    println!(
        "\nApproved {}, rejected {}, skipped {}{}",
        outcome.approved,
        outcome.rejected,
        outcome.skipped,
        if outcome.halted { " (stopped early)" } else { "" }
    );
    if outcome.ticket_failures > 0 {
        println!(
            "  {} approvals not recorded: ticket creation failed",
            outcome.ticket_failures
        );
    }
    for t in &outcome.created {
        println!("  created {} for {}", t.key, t.cluster_signature);
    }
    for issue in &outcome.issues {
        println!("  ! {}: {}", issue.subject, issue.message);
    }
    Ok(())
}

/// Line-oriented prompt over any reader/writer pair.
pub struct TermPrompt<R, W> {
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> TermPrompt<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    fn show(&mut self, index: usize, total: usize, draft: &TicketDraft) -> std::io::Result<()> {
        let label = draft.label.map(|l| l.as_str()).unwrap_or("-");
        let severity = draft.severity.map(|s| s.as_str()).unwrap_or("-");
        writeln!(self.out, "\n  [{}/{}] {} {label}/{severity} {} hits", index + 1, total, draft.service, draft.hits)?;
        writeln!(self.out, "  Summary: {}", draft.summary)?;
        for line in draft.description.lines().take(DESCRIPTION_LINES) {
            writeln!(self.out, "    {line}")?;
        }
        if !draft.kql_filter.is_empty() {
            writeln!(self.out, "  KQL: {}", draft.kql_filter)?;
        }
        writeln!(self.out, "\n  [A] Approve   [R] Reject   [S] Skip   [X] Skip all")
    }
}

impl<R: BufRead + Send, W: Write + Send> ReviewPrompt for TermPrompt<R, W> {
    fn ask(&mut self, index: usize, total: usize, draft: &TicketDraft) -> Result<ReviewChoice> {
        self.show(index, total, draft)?;
        loop {
            write!(self.out, "  > ")?;
            self.out.flush()?;
            let mut input = String::new();
            match self.input.read_line(&mut input) {
                Ok(0) | Err(_) => return Ok(ReviewChoice::SkipAll), // EOF or error
                _ => {}
            }
            match ReviewChoice::parse(&input) {
                Some(choice) => return Ok(choice),
                None => writeln!(self.out, "  Invalid choice. Enter A, R, S, or X.")?,
            }
        }
    }
}
