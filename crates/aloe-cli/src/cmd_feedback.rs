use aloe_core::FeedbackEntry;
use aloe_ledger::FeedbackStore;
use anyhow::Result;
use time::format_description::well_known::Rfc3339;

use crate::workspace::Workspace;

fn line(e: &FeedbackEntry) -> String {
    format!(
        "{:<16}  {:<8}  {}/{}  {}  {}",
        e.cluster_signature,
        e.decision.as_str(),
        e.label.map(|l| l.as_str()).unwrap_or("-"),
        e.severity.map(|s| s.as_str()).unwrap_or("-"),
        e.decided_at.format(&Rfc3339).unwrap_or_default(),
        e.service.as_deref().unwrap_or("-"),
    )
}

/// Latest decision per signature, newest first.
pub fn latest_entries(store: &FeedbackStore) -> Result<Vec<FeedbackEntry>> {
    let mut entries: Vec<FeedbackEntry> = store.snapshot()?.iter().cloned().collect();
    entries.sort_by(|a, b| {
        b.decided_at
            .cmp(&a.decided_at)
            .then_with(|| a.cluster_signature.cmp(&b.cluster_signature))
    });
    Ok(entries)
}

/// Execute `aloe feedback list`.
pub fn list(ws: &Workspace, json: bool) -> Result<()> {
    let store = FeedbackStore::open(&ws.paths)?;
    let entries = latest_entries(&store)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No review decisions recorded yet.");
        return Ok(());
    }
    for e in &entries {
        println!("{}", line(e));
    }
    Ok(())
}

/// Execute `aloe feedback show <signature>`.
pub fn show(ws: &Workspace, signature: &str) -> Result<()> {
    let store = FeedbackStore::open(&ws.paths)?;
    let history = store.history(signature)?;
    if history.is_empty() {
        println!("No decisions for {signature}.");
        return Ok(());
    }
    for e in &history {
        println!("{}", line(e));
        if let Some(src) = &e.source {
            println!("  source: {src}");
        }
        for l in e.draft_snapshot.lines().take(3) {
            println!("  | {l}");
        }
    }
    Ok(())
}
