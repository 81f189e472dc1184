//! Initialization helpers for `.coder/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{CoderConfig, write_config};

const CODER_GITIGNORE: &str = "runs/\n";

/// Canonical paths within `.coder/` for a project root.
#[derive(Debug, Clone)]
pub struct CoderPaths {
    pub root: PathBuf,
    pub coder_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl CoderPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let coder_dir = root.join(".coder");
        Self {
            root,
            gitignore_path: coder_dir.join(".gitignore"),
            config_path: coder_dir.join("config.toml"),
            runs_dir: coder_dir.join("runs"),
            coder_dir,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

/// Options for `init_coder`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config with defaults.
    pub force: bool,
}

/// Create `.coder/` scaffolding in `root` with a default config.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_coder(root: &Path, options: &InitOptions) -> Result<CoderPaths> {
    let paths = CoderPaths::new(root);
    if paths.coder_dir.exists() && !paths.coder_dir.is_dir() {
        return Err(anyhow!("coder init: .coder exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "coder init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    fs::write(&paths.gitignore_path, CODER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &CoderConfig::default())?;
    Ok(paths)
}
