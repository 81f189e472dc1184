//! Execution and reflection: run the suite, then decide what happens next.

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::NodeContext;
use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::core::types::{DecisionAction, DecisionResult, NextAction, Phase, StopReason};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;

#[instrument(skip_all, fields(iteration = state.iteration))]
pub(super) fn executor<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let timeout = ctx.checker_timeout()?;
    let run = ctx
        .sandbox
        .run(&state.impl_artifact, &state.test_artifact, timeout);
    info!(succeeded = run.succeeded, timed_out = run.timed_out, "test run finished");
    Ok(StatePatch {
        exec_log: Some(run.log),
        last_run_passed: Some(run.succeeded),
        ..StatePatch::default()
    })
}

/// Classify the latest run. Advances `iteration` by one on every path.
#[instrument(skip_all, fields(iteration = state.iteration, phase = state.phase.as_str()))]
pub(super) fn reflector<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let iteration = Some(state.iteration + 1);
    let limit = ctx.limits.global_iteration_limit;

    if state.iteration > limit {
        warn!(limit, "iteration limit reached, finishing");
        return Ok(StatePatch {
            iteration,
            feedback: Some("loop limit".to_string()),
            next_action: Some(NextAction::Finish),
            stop_reason: Some(StopReason::IterationLimit),
            ..StatePatch::default()
        });
    }

    if state.last_run_passed == Some(true) {
        return Ok(match state.phase {
            Phase::Dev => {
                info!("tests passed, starting mutation check");
                StatePatch {
                    iteration,
                    phase: Some(Phase::Mutation),
                    feedback: Some(String::new()),
                    next_action: Some(NextAction::MutationCheck),
                    ..StatePatch::default()
                }
            }
            Phase::Mutation => {
                info!("tests passed in mutation phase, finishing");
                StatePatch {
                    iteration,
                    feedback: Some(String::new()),
                    next_action: Some(NextAction::Finish),
                    stop_reason: Some(StopReason::TestsPassed),
                    ..StatePatch::default()
                }
            }
        });
    }

    let decision: DecisionResult = ctx.structured(NodeId::Reflector, state)?;
    let (next_action, stop_reason) = match decision.action {
        DecisionAction::RetryCode => (NextAction::RetryCode, None),
        DecisionAction::RetryTest => (NextAction::RetryTest, None),
        DecisionAction::Replan => (NextAction::Replan, None),
        DecisionAction::MutationCheck | DecisionAction::Finish => {
            warn!(
                action = ?decision.action,
                "success-only action after a failed run, retrying code"
            );
            (NextAction::RetryCode, None)
        }
        DecisionAction::Unrecognized => {
            warn!("unrecognized decision, finishing");
            (NextAction::Finish, Some(StopReason::UnrecognizedDecision))
        }
    };
    info!(action = %next_action, analysis = %decision.analysis, "reflector decided");
    Ok(StatePatch {
        iteration,
        feedback: Some(decision.feedback),
        next_action: Some(next_action),
        stop_reason,
        ..StatePatch::default()
    })
}
