//! Sandboxed execution of the test-checking command against generated artifacts.
//!
//! A sandbox owns one directory holding the implementation and test artifacts.
//! By default the directory is a private temp dir removed on drop, so
//! independent runs never share artifact files. A configured fixed directory
//! is guarded by an exclusive lock file for the sandbox's lifetime.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::io::config::SandboxConfig;
use crate::io::process::run_command_with_timeout;

const LOCK_FILE: &str = ".coder-sandbox.lock";

/// Result of one sandbox invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    /// Combined stdout/stderr of the checker, or the error text when it could not run.
    pub log: String,
    /// True only when the checker exited with status zero before the timeout.
    pub succeeded: bool,
    pub timed_out: bool,
}

impl SandboxRun {
    /// A failed run carrying an error description as its log.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            log: message.into(),
            succeeded: false,
            timed_out: false,
        }
    }
}

/// Abstraction over the execution environment for generated artifacts.
///
/// Implementations never return errors: anything that prevents the checker
/// from running is reported as a failed [`SandboxRun`].
pub trait Sandbox {
    /// Write both artifacts (overwriting) and run the checker.
    fn run(&self, implementation: &str, tests: &str, timeout: Duration) -> SandboxRun;

    /// Run the checker with `mutant` in place of the implementation, then
    /// restore `original` regardless of how the run ended.
    fn probe_mutant(
        &self,
        original: &str,
        mutant: &str,
        tests: &str,
        timeout: Duration,
    ) -> SandboxRun;
}

enum SandboxDir {
    Temp(TempDir),
    Locked(WorkdirLock),
}

impl SandboxDir {
    fn path(&self) -> &Path {
        match self {
            SandboxDir::Temp(dir) => dir.path(),
            SandboxDir::Locked(lock) => &lock.dir,
        }
    }
}

/// Exclusive claim on a fixed sandbox directory, released on drop.
struct WorkdirLock {
    dir: PathBuf,
    lock_path: PathBuf,
}

impl WorkdirLock {
    fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create sandbox dir {}", dir.display()))?;
        let lock_path = dir.join(LOCK_FILE);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .with_context(|| {
                format!(
                    "sandbox dir {} is in use (remove {} if no run is active)",
                    dir.display(),
                    lock_path.display()
                )
            })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock_path,
        })
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.lock_path) {
            warn!(err = %err, path = %self.lock_path.display(), "failed to release sandbox lock");
        }
    }
}

/// Sandbox that runs the configured command as a child process.
pub struct ProcessSandbox {
    dir: SandboxDir,
    command: Vec<String>,
    implementation_file: String,
    test_file: String,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(anyhow!("sandbox command must not be empty"));
        }
        let dir = match &config.workdir {
            Some(workdir) => SandboxDir::Locked(WorkdirLock::acquire(workdir)?),
            None => SandboxDir::Temp(
                tempfile::Builder::new()
                    .prefix("coder-sandbox-")
                    .tempdir()
                    .context("create sandbox temp dir")?,
            ),
        };
        info!(dir = %dir.path().display(), "sandbox ready");
        Ok(Self {
            dir,
            command: config.command.clone(),
            implementation_file: config.implementation_file.clone(),
            test_file: config.test_file.clone(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }

    /// Directory holding the artifact files.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn implementation_path(&self) -> PathBuf {
        self.root().join(&self.implementation_file)
    }

    pub fn test_path(&self) -> PathBuf {
        self.root().join(&self.test_file)
    }

    fn write_artifacts(&self, implementation: &str, tests: &str) -> Result<()> {
        let impl_path = self.implementation_path();
        fs::write(&impl_path, implementation)
            .with_context(|| format!("write {}", impl_path.display()))?;
        let test_path = self.test_path();
        fs::write(&test_path, tests).with_context(|| format!("write {}", test_path.display()))?;
        Ok(())
    }

    fn execute(&self, timeout: Duration) -> SandboxRun {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(self.root());
        match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => {
                let run = SandboxRun {
                    log: output.combined_log("checker"),
                    succeeded: output.succeeded(),
                    timed_out: output.timed_out,
                };
                info!(
                    succeeded = run.succeeded,
                    timed_out = run.timed_out,
                    "checker finished"
                );
                run
            }
            Err(err) => {
                warn!(err = %err, "checker could not run");
                SandboxRun::failed(format!("Execution Error: {err:#}"))
            }
        }
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(
        skip_all,
        fields(dir = %self.root().display(), timeout_ms = timeout.as_millis() as u64)
    )]
    fn run(&self, implementation: &str, tests: &str, timeout: Duration) -> SandboxRun {
        if let Err(err) = self.write_artifacts(implementation, tests) {
            warn!(err = %err, "failed to write artifacts");
            return SandboxRun::failed(format!("Execution Error: {err:#}"));
        }
        self.execute(timeout)
    }

    #[instrument(
        skip_all,
        fields(dir = %self.root().display(), timeout_ms = timeout.as_millis() as u64)
    )]
    fn probe_mutant(
        &self,
        original: &str,
        mutant: &str,
        tests: &str,
        timeout: Duration,
    ) -> SandboxRun {
        let _restore = RestoreOnDrop {
            path: self.implementation_path(),
            contents: original,
        };
        if let Err(err) = self.write_artifacts(mutant, tests) {
            warn!(err = %err, "failed to write mutant");
            return SandboxRun::failed(format!("Execution Error: {err:#}"));
        }
        self.execute(timeout)
    }
}

/// Writes the original implementation back when dropped, including on unwind.
struct RestoreOnDrop<'a> {
    path: PathBuf,
    contents: &'a str,
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        match fs::write(&self.path, self.contents) {
            Ok(()) => debug!(path = %self.path.display(), "restored implementation"),
            Err(err) => warn!(
                err = %err,
                path = %self.path.display(),
                "failed to restore implementation"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(script: &str) -> SandboxConfig {
        SandboxConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: None,
            implementation_file: "implementation.py".to_string(),
            test_file: "test_suite.py".to_string(),
            timeout_secs: 10,
            output_limit_bytes: 10_000,
        }
    }

    /// Verifies the checker sees both artifacts and its exit status decides success.
    #[test]
    fn run_writes_artifacts_and_reports_status() {
        let sandbox =
            ProcessSandbox::new(&config("grep -q ok implementation.py && cat test_suite.py"))
                .expect("sandbox");

        let pass = sandbox.run("ok", "def test_a(): pass", Duration::from_secs(5));
        assert!(pass.succeeded);
        assert!(pass.log.contains("def test_a"));

        let fail = sandbox.run("broken", "def test_a(): pass", Duration::from_secs(5));
        assert!(!fail.succeeded);
        assert!(fail.log.contains("exit status 1"));
    }

    /// Verifies a hung checker is reported as a failed, timed-out run.
    #[test]
    fn timeout_is_a_failed_run() {
        let sandbox = ProcessSandbox::new(&config("sleep 5")).expect("sandbox");
        let run = sandbox.run("x", "y", Duration::from_millis(200));
        assert!(!run.succeeded);
        assert!(run.timed_out);
        assert!(run.log.contains("timed out"));
    }

    /// Verifies a missing checker binary becomes a failed run, not an error.
    #[test]
    fn spawn_failure_is_a_failed_run() {
        let mut cfg = config("true");
        cfg.command = vec!["definitely-not-a-real-checker-xyz".to_string()];
        let sandbox = ProcessSandbox::new(&cfg).expect("sandbox");
        let run = sandbox.run("x", "y", Duration::from_secs(1));
        assert!(!run.succeeded);
        assert!(run.log.starts_with("Execution Error:"));
    }

    /// Verifies the original implementation is back on disk after a probe,
    /// whichever way the probe ends.
    #[test]
    fn probe_restores_original_implementation() {
        let sandbox = ProcessSandbox::new(&config("grep -q original implementation.py"))
            .expect("sandbox");
        sandbox.run("original", "tests", Duration::from_secs(5));

        let killed =
            sandbox.probe_mutant("original", "mutant", "tests", Duration::from_secs(5));
        assert!(!killed.succeeded);
        let on_disk = fs::read_to_string(sandbox.implementation_path()).expect("read");
        assert_eq!(on_disk, "original");

        let timed_out_sandbox = ProcessSandbox::new(&config("sleep 5")).expect("sandbox");
        let probe = timed_out_sandbox.probe_mutant(
            "original",
            "mutant",
            "tests",
            Duration::from_millis(200),
        );
        assert!(probe.timed_out);
        let on_disk = fs::read_to_string(timed_out_sandbox.implementation_path()).expect("read");
        assert_eq!(on_disk, "original");
    }

    /// Verifies two sandboxes cannot share a fixed directory at the same time.
    #[test]
    fn fixed_workdir_is_exclusive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = config("true");
        cfg.workdir = Some(temp.path().join("box"));

        let first = ProcessSandbox::new(&cfg).expect("first sandbox");
        let err = ProcessSandbox::new(&cfg).err().expect("second sandbox must fail");
        assert!(format!("{err:#}").contains("is in use"));

        drop(first);
        let again = ProcessSandbox::new(&cfg).expect("lock released on drop");
        assert!(again.run("x", "y", Duration::from_secs(5)).succeeded);
    }

    /// Verifies default sandboxes get distinct private directories.
    #[test]
    fn temp_sandboxes_do_not_share_paths() {
        let a = ProcessSandbox::new(&config("true")).expect("a");
        let b = ProcessSandbox::new(&config("true")).expect("b");
        assert_ne!(a.root(), b.root());
        let name = a.root().file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("coder-sandbox-"));
    }
}
