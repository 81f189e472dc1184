//! Orchestrator: drives nodes through the transition table until a terminal route.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{DeadlineExceeded, Limits, remaining_budget};
use crate::core::graph::{NodeId, Route, TransitionTable};
use crate::core::invariants::check_patch;
use crate::core::state::WorkflowState;
use crate::core::types::{NextAction, StopReason};
use crate::io::config::CoderConfig;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::Sandbox;
use crate::nodes::{NodeContext, run_node};

/// Settings for one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub limits: Limits,
    pub run_timeout: Duration,
    pub generator_timeout: Duration,
    pub sandbox_timeout: Duration,
    pub prompt_budget_bytes: usize,
    pub implementation_file: String,
    pub test_file: String,
}

impl WorkflowConfig {
    pub fn from_config(config: &CoderConfig) -> Self {
        Self {
            limits: config.limits(),
            run_timeout: config.run_timeout(),
            generator_timeout: Duration::from_secs(config.generator.timeout_secs),
            sandbox_timeout: Duration::from_secs(config.sandbox.timeout_secs),
            prompt_budget_bytes: config.prompt_budget_bytes,
            implementation_file: config.sandbox.implementation_file.clone(),
            test_file: config.sandbox.test_file.clone(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from_config(&CoderConfig::default())
    }
}

/// Record of one executed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// 1-based position of this node in the run.
    pub seq: u32,
    pub node: NodeId,
    pub action: Option<NextAction>,
    pub route: Route,
    pub duration: Duration,
    /// State fields the node's patch wrote.
    pub fields: Vec<&'static str>,
}

/// Final state of a completed run.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub state: WorkflowState,
    pub stop: StopReason,
    pub steps_executed: u32,
}

/// Run one workflow instance from the entry node to a terminal route.
///
/// Stops on the terminal route or when the run deadline elapses. Any other
/// error (generation failure, invalid patch, missing edge) aborts the run.
/// `on_step` sees every step after its patch has been merged.
#[instrument(skip_all, fields(run_timeout_secs = config.run_timeout.as_secs()))]
pub fn run_workflow<G, S, F>(
    requirements: &str,
    generator: &G,
    sandbox: &S,
    config: &WorkflowConfig,
    mut on_step: F,
) -> Result<WorkflowOutcome>
where
    G: Generator,
    S: Sandbox,
    F: FnMut(&StepOutcome, &WorkflowState) -> Result<()>,
{
    let table = TransitionTable::standard();
    table.validate()?;

    let deadline = Instant::now() + config.run_timeout;
    let prompts = PromptBuilder::new(config.prompt_budget_bytes)
        .with_limits(config.limits)
        .with_artifact_files(&config.implementation_file, &config.test_file);
    let ctx = NodeContext {
        generator,
        sandbox,
        prompts: &prompts,
        limits: config.limits,
        generator_timeout: config.generator_timeout,
        sandbox_timeout: config.sandbox_timeout,
        deadline,
    };

    let mut state = WorkflowState::new(requirements);
    let mut node = table.entry();
    let mut steps_executed = 0u32;
    info!(entry = %node, "workflow started");

    loop {
        if remaining_budget(deadline).is_err() {
            return Ok(deadline_stop(state, node, steps_executed));
        }

        let started = Instant::now();
        let patch = match run_node(node, &ctx, &state) {
            Ok(patch) => patch,
            Err(err) if err.downcast_ref::<DeadlineExceeded>().is_some() => {
                return Ok(deadline_stop(state, node, steps_executed));
            }
            Err(err) => return Err(err.context(format!("{node} failed"))),
        };

        let violations = check_patch(node, &state, &patch);
        if !violations.is_empty() {
            bail!(
                "{node} returned an invalid patch:\n- {}",
                violations.join("\n- ")
            );
        }

        let fields = patch.touched_fields();
        state.apply(patch);
        let action = state.take_next_action();
        let route = table.route(node, action)?;
        steps_executed += 1;

        let step = StepOutcome {
            seq: steps_executed,
            node,
            action,
            route,
            duration: started.elapsed(),
            fields,
        };
        debug!(
            seq = step.seq,
            node = %step.node,
            action = ?step.action,
            route = %step.route,
            duration_ms = step.duration.as_millis() as u64,
            "step finished"
        );
        on_step(&step, &state)?;

        match route {
            Route::Node(next) => node = next,
            Route::End => {
                let stop = state
                    .stop_reason
                    .ok_or_else(|| anyhow!("{node} finished the run without a stop reason"))?;
                info!(
                    stop = %stop,
                    steps_executed,
                    iteration = state.iteration,
                    "workflow finished"
                );
                return Ok(WorkflowOutcome {
                    state,
                    stop,
                    steps_executed,
                });
            }
        }
    }
}

fn deadline_stop(mut state: WorkflowState, node: NodeId, steps_executed: u32) -> WorkflowOutcome {
    warn!(next = %node, steps_executed, "run deadline exceeded");
    state.stop_reason = Some(StopReason::DeadlineExceeded);
    WorkflowOutcome {
        state,
        stop: StopReason::DeadlineExceeded,
        steps_executed,
    }
}
