//! Planning cycle: product owner, architect, critic and spec compiler.

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::NodeContext;
use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::core::types::{NextAction, SpecVerdict};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;

/// Distill requirements into user stories. The sole reset point for run counters.
#[instrument(skip_all)]
pub(super) fn product_owner<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let notes = ctx.text(NodeId::ProductOwner, state)?;
    Ok(StatePatch {
        reset_run: true,
        product_notes: Some(notes),
        ..StatePatch::default()
    })
}

#[instrument(skip_all, fields(replan_count = state.replan_count))]
pub(super) fn architect<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let notes = ctx.text(NodeId::Architect, state)?;
    Ok(StatePatch {
        architect_notes: Some(notes),
        ..StatePatch::default()
    })
}

#[instrument(skip_all)]
pub(super) fn critic<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let notes = ctx.text(NodeId::Critic, state)?;
    Ok(StatePatch {
        critic_notes: Some(notes),
        ..StatePatch::default()
    })
}

/// Compile the planning notes into a spec, or send the design back.
///
/// Once `max_replans` redesigns have been spent, a verdict that still asks
/// for a replan is accepted anyway and the spec is marked degraded.
#[instrument(skip_all, fields(replan_count = state.replan_count))]
pub(super) fn spec_compiler<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let verdict: SpecVerdict = ctx.structured(NodeId::SpecCompiler, state)?;
    let max_replans = ctx.limits.max_replans;

    if verdict.needs_replan && state.replan_count >= max_replans {
        warn!(
            max_replans,
            reason = %verdict.replan_reason,
            "replan cap reached, accepting spec as degraded"
        );
        return Ok(StatePatch {
            spec: Some(Some(verdict.spec)),
            spec_degraded: Some(true),
            feedback: Some(format!(
                "Warning: Spec finalized after {max_replans} replans. Critic issues may remain."
            )),
            next_action: Some(NextAction::Proceed),
            ..StatePatch::default()
        });
    }

    if verdict.needs_replan {
        let reason = match verdict.replan_reason.trim() {
            "" => "The review found problems with the design. Revise it.".to_string(),
            reason => reason.to_string(),
        };
        info!(replan = state.replan_count + 1, "spec sent back for redesign");
        return Ok(StatePatch {
            spec: Some(None),
            feedback: Some(reason),
            replan_count: Some(state.replan_count + 1),
            next_action: Some(NextAction::ReplanInternal),
            ..StatePatch::default()
        });
    }

    info!(function = %verdict.spec.function_name, "spec accepted");
    Ok(StatePatch {
        spec: Some(Some(verdict.spec)),
        spec_degraded: Some(false),
        feedback: Some(String::new()),
        next_action: Some(NextAction::Proceed),
        ..StatePatch::default()
    })
}
