//! Workflow configuration stored under `.coder/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::{GLOBAL_LIMIT, Limits, MAX_REPLANS};

/// Workflow configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below, which reproduce the standard loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoderConfig {
    /// Internal replans before the spec compiler force-accepts a spec.
    pub max_replans: u32,

    /// Reflector passes before the run is forcibly finished.
    pub global_iteration_limit: u32,

    /// Wall-clock budget for the whole run, shared by every external call.
    pub run_timeout_secs: u64,

    /// Maximum bytes of a rendered prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    pub sandbox: SandboxConfig,

    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Test-checking command, run inside the sandbox directory.
    pub command: Vec<String>,
    /// Fixed sandbox directory. When unset, each run gets a private temp dir.
    pub workdir: Option<PathBuf>,
    pub implementation_file: String,
    pub test_file: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: ["pytest", "test_suite.py", "-v", "--tb=short"]
                .map(String::from)
                .to_vec(),
            workdir: None,
            implementation_file: "implementation.py".to_string(),
            test_file: "test_suite.py".to_string(),
            timeout_secs: 10,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Agent CLI invoked once per generation request. The prompt is fed on stdin.
    pub command: Vec<String>,
    /// Flag that passes the JSON Schema path for structured responses.
    pub schema_flag: Option<String>,
    /// Flag that names the file the agent writes its final message to.
    /// When unset, the response is read from stdout.
    pub output_flag: Option<String>,
    /// Trailing argument telling the agent to read the prompt from stdin.
    pub stdin_marker: Option<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "--sandbox", "read-only"]
                .map(String::from)
                .to_vec(),
            schema_flag: Some("--output-schema".to_string()),
            output_flag: Some("--output-last-message".to_string()),
            stdin_marker: Some("-".to_string()),
            timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            max_replans: MAX_REPLANS,
            global_iteration_limit: GLOBAL_LIMIT,
            run_timeout_secs: 2 * 60 * 60,
            prompt_budget_bytes: 60_000,
            sandbox: SandboxConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl CoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.sandbox.command.is_empty() || self.sandbox.command[0].trim().is_empty() {
            return Err(anyhow!("sandbox.command must be a non-empty array"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (key, name) in [
            ("sandbox.implementation_file", &self.sandbox.implementation_file),
            ("sandbox.test_file", &self.sandbox.test_file),
        ] {
            if !is_plain_file_name(name) {
                return Err(anyhow!("{key} must be a plain file name, got '{name}'"));
            }
        }
        if self.sandbox.implementation_file == self.sandbox.test_file {
            return Err(anyhow!(
                "sandbox.implementation_file and sandbox.test_file must differ"
            ));
        }
        if let Some(stale) = self.sandbox.stale_test_file_argument() {
            return Err(anyhow!(
                "sandbox.command runs '{stale}' but sandbox.test_file is '{}'; \
                 update the command to match",
                self.sandbox.test_file
            ));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_replans: self.max_replans,
            global_iteration_limit: self.global_iteration_limit,
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl SandboxConfig {
    /// A file named in `command` that looks like a test file but is not `test_file`.
    ///
    /// Commands that name no such file (`make test`, bare `pytest`) are accepted.
    fn stale_test_file_argument(&self) -> Option<&str> {
        let extension = Path::new(&self.test_file).extension()?.to_str()?;
        self.command
            .iter()
            .flat_map(|arg| arg.split_whitespace())
            .map(|token| token.rsplit('/').next().unwrap_or(token))
            .find(|name| {
                Path::new(name).extension().and_then(|ext| ext.to_str()) == Some(extension)
                    && *name != self.test_file
                    && *name != self.implementation_file
            })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.trim().is_empty()
        && path.file_name().and_then(|n| n.to_str()) == Some(name)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoderConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoderConfig> {
    if !path.exists() {
        let cfg = CoderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CoderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CoderConfig::default());
        assert_eq!(cfg.limits(), Limits::default());
    }

    #[test]
    fn write_then_load_preserves_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".coder/config.toml");
        let cfg = CoderConfig {
            max_replans: 1,
            sandbox: SandboxConfig {
                command: vec!["python".to_string(), "-m".to_string(), "pytest".to_string()],
                workdir: Some(temp.path().join("box")),
                ..SandboxConfig::default()
            },
            ..CoderConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "global_iteration_limit = 5\n[sandbox]\ntimeout_secs = 15\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.global_iteration_limit, 5);
        assert_eq!(cfg.sandbox.timeout_secs, 15);
        assert_eq!(cfg.sandbox.test_file, "test_suite.py");
        assert_eq!(cfg.max_replans, MAX_REPLANS);
    }

    #[test]
    fn rejects_nested_artifact_names() {
        let cfg = CoderConfig {
            sandbox: SandboxConfig {
                test_file: "../escape.py".to_string(),
                ..SandboxConfig::default()
            },
            ..CoderConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("plain file name"));
    }

    /// Verifies renaming the test file without updating the checker command is rejected.
    #[test]
    fn rejects_command_naming_another_test_file() {
        let renamed = CoderConfig {
            sandbox: SandboxConfig {
                test_file: "test_average.py".to_string(),
                ..SandboxConfig::default()
            },
            ..CoderConfig::default()
        };
        let err = renamed.validate().unwrap_err();
        assert!(err.to_string().contains("'test_suite.py'"), "{err}");

        let matching = CoderConfig {
            sandbox: SandboxConfig {
                command: vec!["pytest".to_string(), "test_average.py".to_string()],
                test_file: "test_average.py".to_string(),
                ..SandboxConfig::default()
            },
            ..CoderConfig::default()
        };
        matching.validate().expect("command names the test file");

        let discovering = CoderConfig {
            sandbox: SandboxConfig {
                command: vec!["sh".to_string(), "-c".to_string(), "make test".to_string()],
                test_file: "test_average.py".to_string(),
                ..SandboxConfig::default()
            },
            ..CoderConfig::default()
        };
        discovering.validate().expect("command names no file");
    }
}
