//! Run records under `.coder/runs/<run-id>/`.
//!
//! Product artifacts, always written and unaffected by `RUST_LOG`. One
//! directory per executed node holds the step summary and the state after the
//! merge; `final/` holds the terminal artifacts and the run summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;

use crate::core::graph::NodeId;
use crate::core::state::WorkflowState;
use crate::core::types::{MutationOutcome, NextAction, Phase, StopReason};
use crate::io::init::CoderPaths;
use crate::workflow::{StepOutcome, WorkflowOutcome};

/// `<UTC timestamp>_<6 lowercase alphanumerics>`, sortable by start time.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{}_{suffix}", Utc::now().format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub seq: u32,
    pub node: NodeId,
    pub action: Option<NextAction>,
    pub route: String,
    pub duration_ms: u64,
    pub fields: Vec<&'static str>,
    pub iteration: u32,
    pub replan_count: u32,
    pub phase: Phase,
}

impl StepRecord {
    fn new(step: &StepOutcome, state: &WorkflowState) -> Self {
        Self {
            seq: step.seq,
            node: step.node,
            action: step.action,
            route: step.route.to_string(),
            duration_ms: step.duration.as_millis() as u64,
            fields: step.fields.clone(),
            iteration: state.iteration,
            replan_count: state.replan_count,
            phase: state.phase,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub success: bool,
    pub spec_degraded: bool,
    pub function_name: Option<String>,
    pub iterations: u32,
    pub replan_count: u32,
    pub phase: Phase,
    pub mutation_log: Vec<MutationOutcome>,
    pub steps_executed: u32,
    pub implementation_path: PathBuf,
    pub test_path: PathBuf,
}

/// Writes the records of a single run.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    run_id: String,
    run_dir: PathBuf,
}

impl RunRecorder {
    pub fn create(paths: &CoderPaths, run_id: &str) -> Result<Self> {
        let run_dir = paths.run_dir(run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            run_dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Directory for per-request generator logs.
    pub fn generator_dir(&self) -> PathBuf {
        self.run_dir.join("generator")
    }

    /// Record one executed node. Returns the step directory.
    pub fn record_step(&self, step: &StepOutcome, state: &WorkflowState) -> Result<PathBuf> {
        let dir = self.run_dir.join(format!("{:03}-{}", step.seq, step.node));
        fs::create_dir_all(&dir).with_context(|| format!("create step dir {}", dir.display()))?;

        write_json(&dir.join("step.json"), &StepRecord::new(step, state))?;
        write_json(&dir.join("state.json"), state)?;
        if step.node == NodeId::Executor {
            write_text(&dir.join("exec.log"), &state.exec_log)?;
        }
        Ok(dir)
    }

    /// Write the terminal artifacts and the run summary.
    ///
    /// Artifacts land in `out_dir` when given, otherwise in `<run>/final/`.
    pub fn write_final(
        &self,
        outcome: &WorkflowOutcome,
        implementation_file: &str,
        test_file: &str,
        out_dir: Option<&Path>,
    ) -> Result<RunSummary> {
        let dir = out_dir.map_or_else(|| self.run_dir.join("final"), Path::to_path_buf);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let state = &outcome.state;
        let implementation_path = dir.join(implementation_file);
        let test_path = dir.join(test_file);
        write_text(&implementation_path, &state.impl_artifact)?;
        write_text(&test_path, &state.test_artifact)?;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            stop_reason: outcome.stop,
            success: outcome.stop.is_success(),
            spec_degraded: state.spec_degraded,
            function_name: state.spec.as_ref().map(|spec| spec.function_name.clone()),
            iterations: state.iteration,
            replan_count: state.replan_count,
            phase: state.phase,
            mutation_log: state.mutation_log.clone(),
            steps_executed: outcome.steps_executed,
            implementation_path,
            test_path,
        };
        write_json(&self.run_dir.join("summary.json"), &summary)?;
        Ok(summary)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
