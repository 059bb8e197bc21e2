use std::path::Path;

use aloe_core::config::AloeConfig;
use aloe_ledger::AloePaths;
use aloe_store::write_json_atomic;

pub fn execute(root: &Path) -> anyhow::Result<()> {
    let paths = AloePaths::discover(root);
    let existed = paths.is_initialized();
    paths.ensure_layout()?;

    if !paths.config_json.exists() {
        write_json_atomic(&paths.config_json, &AloeConfig::default())?;
    }

    if existed {
        println!("Already initialized at {}", paths.aloe_dir.display());
    } else {
        println!("Initialized {}", paths.aloe_dir.display());
        println!("  config:   {}", paths.config_json.display());
        println!("  feedback: {}", paths.feedback_jsonl.display());
        println!("  runs:     {}", paths.runs_dir.display());
    }
    Ok(())
}
