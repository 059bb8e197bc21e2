use std::path::Path;

use aloe_core::config::AloeConfig;
use aloe_ledger::AloePaths;
use anyhow::{Context, Result};

/// An initialized `.aloe/` workspace with its loaded configuration.
pub struct Workspace {
    pub paths: AloePaths,
    pub config: AloeConfig,
}

impl Workspace {
    /// Find the nearest workspace at or above `cwd` and load its config.
    pub fn open(cwd: &Path) -> Result<Self> {
        let root = AloePaths::find_root(cwd).with_context(|| {
            format!("no .aloe/ workspace at or above {}; run `aloe init` first", cwd.display())
        })?;
        let paths = AloePaths::discover(root);
        let config = AloeConfig::load(&paths.config_json)?;
        // Fail on bad mask rules before any command does real work.
        aloe_core::mask::Masker::new(&config.mask).context("invalid mask configuration")?;
        tracing::debug!(root = %paths.root.display(), "workspace opened");
        Ok(Self { paths, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_requires_init() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Workspace::open(tmp.path()).err().unwrap();
        assert!(err.to_string().contains("aloe init"));
    }

    #[test]
    fn open_finds_parent_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        crate::cmd_init::execute(tmp.path()).unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let ws = Workspace::open(&nested).unwrap();
        assert_eq!(ws.paths.root, tmp.path());
    }

    #[test]
    fn bad_mask_rule_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        crate::cmd_init::execute(tmp.path()).unwrap();
        let cfg = r#"{"mask": {"rules": [{"name": "broken", "regex": "(unclosed"}]}}"#;
        std::fs::write(tmp.path().join(".aloe").join("config.json"), cfg).unwrap();
        let err = Workspace::open(tmp.path()).err().unwrap();
        assert!(format!("{err:#}").contains("invalid mask configuration"));
    }
}
