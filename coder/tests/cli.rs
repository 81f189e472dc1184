//! CLI tests for the `coder` binary.
//!
//! Spawns the binary and verifies exit codes and the on-disk effects of the
//! commands that need no generation backend.

use std::process::Command;

use coder::exit_codes;
use coder::io::config::load_config;
use coder::io::init::CoderPaths;

#[test]
fn graph_prints_transition_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_coder"))
        .current_dir(temp.path())
        .arg("graph")
        .output()
        .expect("coder graph");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("entry: product_owner"));
    assert!(stdout.contains("product_owner -----> architect"));
    assert!(stdout.contains("reflector --mutation_check--> mutation_auditor"));
    assert!(stdout.contains("mutation_auditor --finish--> end"));
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_coder"))
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("coder init");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let paths = CoderPaths::new(temp.path());
    let config = load_config(&paths.config_path).expect("config");
    assert_eq!(config.max_replans, 3);
    assert_eq!(config.global_iteration_limit, 20);

    let status = Command::new(env!("CARGO_BIN_EXE_coder"))
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("coder init again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = Command::new(env!("CARGO_BIN_EXE_coder"))
        .current_dir(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("coder init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn run_rejects_blank_requirements() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_coder"))
        .current_dir(temp.path())
        .args(["run", "--requirements", "  "])
        .status()
        .expect("coder run");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
    assert!(!CoderPaths::new(temp.path()).runs_dir.exists());
}
