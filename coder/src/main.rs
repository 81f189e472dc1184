//! Test-driven code generation workflow CLI.
//!
//! `coder run` plans a single function from natural-language requirements,
//! writes tests and an implementation, iterates until the tests pass, then
//! checks the suite against a mutant before writing the final artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use coder::core::graph::TransitionTable;
use coder::core::types::StopReason;
use coder::exit_codes;
use coder::io::config::load_config;
use coder::io::generator::CommandGenerator;
use coder::io::init::{CoderPaths, InitOptions, init_coder};
use coder::io::sandbox::ProcessSandbox;
use coder::logging;
use coder::run_log::{RunRecorder, generate_run_id};
use coder::workflow::{WorkflowConfig, run_workflow};

#[derive(Parser)]
#[command(
    name = "coder",
    version,
    about = "Test-driven multi-role code generation workflow"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.coder/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one workflow to completion and write the final artifacts.
    Run(RunArgs),
    /// Validate and print the transition table.
    Graph,
}

#[derive(Args)]
#[group(id = "input", required = true, multiple = false)]
struct RunArgs {
    /// Requirements text.
    #[arg(long, group = "input")]
    requirements: Option<String>,
    /// File containing the requirements.
    #[arg(long, group = "input")]
    requirements_file: Option<PathBuf>,
    /// Config file (defaults to `.coder/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for the final artifacts (defaults to the run's `final/` directory).
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => {
            let paths = init_coder(&root, &InitOptions { force })?;
            println!("wrote {}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        Command::Run(args) => cmd_run(&root, &args),
        Command::Graph => cmd_graph(),
    }
}

fn cmd_run(root: &Path, args: &RunArgs) -> Result<i32> {
    let paths = CoderPaths::new(root);
    let config_path = args.config.as_deref().unwrap_or(&paths.config_path);
    let config = load_config(config_path)?;
    let requirements = read_requirements(args)?;

    let recorder = RunRecorder::create(&paths, &generate_run_id())?;
    let generator = CommandGenerator::new(config.generator.clone(), recorder.generator_dir());
    let sandbox = ProcessSandbox::new(&config.sandbox)?;

    let outcome = run_workflow(
        &requirements,
        &generator,
        &sandbox,
        &WorkflowConfig::from_config(&config),
        |step, state| {
            println!("[{:03}] {} -> {}", step.seq, step.node, step.route);
            recorder.record_step(step, state).map(|_| ())
        },
    )
    .with_context(|| format!("run {}", recorder.run_id()))?;

    let summary = recorder.write_final(
        &outcome,
        &config.sandbox.implementation_file,
        &config.sandbox.test_file,
        args.out.as_deref(),
    )?;
    println!("stop: {}", summary.stop_reason);
    if summary.spec_degraded {
        println!("warning: spec was accepted after exhausting replans");
    }
    println!("implementation: {}", summary.implementation_path.display());
    println!("tests: {}", summary.test_path.display());
    println!("run records: {}", recorder.run_dir().display());
    Ok(exit_code_for(summary.stop_reason, summary.spec_degraded))
}

fn cmd_graph() -> Result<i32> {
    let table = TransitionTable::standard();
    table.validate()?;
    println!("entry: {}", table.entry());
    for edge in table.edges() {
        println!("{edge}");
    }
    Ok(exit_codes::OK)
}

fn read_requirements(args: &RunArgs) -> Result<String> {
    let text = match (&args.requirements, &args.requirements_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        (None, None) => return Err(anyhow!("requirements are required")),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("requirements must not be empty"));
    }
    Ok(text.to_string())
}

fn exit_code_for(stop: StopReason, spec_degraded: bool) -> i32 {
    if !stop.is_success() {
        exit_codes::CAPPED
    } else if spec_degraded {
        exit_codes::DEGRADED
    } else {
        exit_codes::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["coder", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn run_requires_exactly_one_input() {
        assert!(Cli::try_parse_from(["coder", "run"]).is_err());
        assert!(
            Cli::try_parse_from([
                "coder",
                "run",
                "--requirements",
                "x",
                "--requirements-file",
                "req.md"
            ])
            .is_err()
        );
        let cli = Cli::parse_from(["coder", "run", "--requirements", "reverse a string"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(read_requirements(&args).expect("req"), "reverse a string");
    }

    #[test]
    fn blank_requirements_are_rejected() {
        let cli = Cli::parse_from(["coder", "run", "--requirements", "   "]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(read_requirements(&args).is_err());
    }

    #[test]
    fn exit_codes_follow_stop_reason() {
        assert_eq!(exit_code_for(StopReason::MutantKilled, false), exit_codes::OK);
        assert_eq!(exit_code_for(StopReason::TestsPassed, true), exit_codes::DEGRADED);
        assert_eq!(exit_code_for(StopReason::AuditInconclusive, false), exit_codes::OK);
        assert_eq!(exit_code_for(StopReason::IterationLimit, false), exit_codes::CAPPED);
        assert_eq!(exit_code_for(StopReason::DeadlineExceeded, true), exit_codes::CAPPED);
        assert_eq!(
            exit_code_for(StopReason::UnrecognizedDecision, false),
            exit_codes::CAPPED
        );
    }
}
