use std::fmt::Write as _;

use aloe_core::cluster::ClusterEngine;
use aloe_core::normalize::Normalizer;
use aloe_core::Cluster;
use anyhow::Result;
use serde_json::json;

use crate::workspace::Workspace;

/// Execute `aloe preprocess`: fetch, normalize and cluster, then print.
pub fn execute(ws: &Workspace, limit: usize, json: bool) -> Result<()> {
    let source = aloe_agents::source::from_config(&ws.config.source)?;
    let rt = tokio::runtime::Runtime::new()?;
    let raw = rt.block_on(source.fetch())?;

    let normalizer = Normalizer::new(ws.config.normalize.clone());
    let batch = normalizer.normalize_batch(&raw, time::OffsetDateTime::now_utc());
    let clusters = ClusterEngine::from_config(&ws.config.mask)?.cluster(batch.records.clone());

    if json {
        let out: Vec<_> = clusters
            .iter()
            .map(|c| {
                json!({
                    "signature": c.signature,
                    "service": c.service,
                    "class": c.class,
                    "pattern": c.pattern,
                    "size": c.size,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Source: {}", source.describe());
    println!(
        "Records: {} raw, {} kept, {} dropped",
        raw.len(),
        batch.records.len(),
        batch.dropped.len()
    );
    for d in batch.dropped.iter().take(5) {
        println!("  dropped #{}: {}", d.index, d.reason);
    }
    print!("{}", render_clusters(&clusters, limit));
    Ok(())
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(n.saturating_sub(3)).collect::<String>())
    }
}

pub fn render_clusters(clusters: &[Cluster], limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Clusters: {}", clusters.len());
    for (i, c) in clusters.iter().take(limit).enumerate() {
        let _ = writeln!(
            out,
            "  {i:>3}  {:>5}  {}  {:<16}  {}",
            c.size,
            c.signature,
            truncate(&c.service, 16),
            truncate(&c.pattern, 80)
        );
    }
    if clusters.len() > limit {
        let _ = writeln!(out, "  ... {} more", clusters.len() - limit);
    }
    out
}
