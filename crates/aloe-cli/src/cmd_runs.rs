use aloe_conductor::pipeline::RunManifest;
use aloe_store::{artifact, RunStore};
use anyhow::Result;
use serde_json::json;

use crate::workspace::Workspace;

/// One line per run. Runs without a manifest were interrupted before
/// their first artifact.
pub fn describe(run_id: &str, manifest: Option<&RunManifest>) -> String {
    let Some(m) = manifest else {
        return format!("{run_id}  (no manifest)");
    };
    let state = match (&m.stopped, m.status) {
        (Some(stopped), _) => format!("stopped:{stopped}"),
        (None, Some(status)) => format!("{status:?}").to_lowercase(),
        (None, None) => "unfinished".to_string(),
    };
    let plan = m.plan_source.map(|p| p.as_str()).unwrap_or("-");
    format!(
        "{run_id}  {}  {state:<16}  {:>5} logs  {:>4} clusters  plan:{plan}  {} issues",
        m.started_at,
        m.counts.log_count,
        m.counts.cluster_count,
        m.issues.len()
    )
}

/// Execute `aloe runs [--json]`.
pub fn execute(ws: &Workspace, json: bool) -> Result<()> {
    let store = RunStore::new(ws.paths.runs_dir.clone());
    let ids = store.list()?;
    let mut rows = Vec::new();
    for id in &ids {
        let manifest: Option<RunManifest> = match store.get(id) {
            Some(dir) => dir.load(artifact::MANIFEST)?,
            None => None,
        };
        rows.push((id.clone(), manifest));
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, m)| json!({"run_id": id, "manifest": m}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No runs yet.");
        return Ok(());
    }
    for (id, m) in &rows {
        println!("{}", describe(id, m.as_ref()));
    }
    Ok(())
}
