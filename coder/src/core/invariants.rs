//! Patch ownership and ordering invariants.
//!
//! Each state field has a single owning node (or a fixed set of writers). The
//! orchestrator runs [`check_patch`] on every patch before merging it; any
//! violation is an internal contract error and aborts the run.

use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::core::types::{NextAction, Phase};

/// Validate a node's patch against the state it was computed from.
///
/// Returns a list of human-readable violations (empty when valid).
pub fn check_patch(node: NodeId, prev: &WorkflowState, patch: &StatePatch) -> Vec<String> {
    let mut errors = Vec::new();
    let mut owned_by = |field: &str, written: bool, owners: &[NodeId]| {
        if written && !owners.contains(&node) {
            errors.push(format!("{node} must not write {field}"));
        }
    };

    owned_by("reset_run", patch.reset_run, &[NodeId::ProductOwner]);
    owned_by("product_notes", patch.product_notes.is_some(), &[NodeId::ProductOwner]);
    owned_by("architect_notes", patch.architect_notes.is_some(), &[NodeId::Architect]);
    owned_by("critic_notes", patch.critic_notes.is_some(), &[NodeId::Critic]);
    owned_by("spec", patch.spec.is_some(), &[NodeId::SpecCompiler]);
    owned_by("spec_degraded", patch.spec_degraded.is_some(), &[NodeId::SpecCompiler]);
    owned_by("replan_count", patch.replan_count.is_some(), &[NodeId::SpecCompiler]);
    owned_by("test_artifact", patch.test_artifact.is_some(), &[NodeId::TestAuthor]);
    owned_by("impl_artifact", patch.impl_artifact.is_some(), &[NodeId::Implementer]);
    owned_by("exec_log", patch.exec_log.is_some(), &[NodeId::Executor]);
    owned_by("last_run_passed", patch.last_run_passed.is_some(), &[NodeId::Executor]);
    owned_by(
        "feedback",
        patch.feedback.is_some(),
        &[
            NodeId::SpecCompiler,
            NodeId::TestAuthor,
            NodeId::Reflector,
            NodeId::MutationAuditor,
        ],
    );
    owned_by("iteration", patch.iteration.is_some(), &[NodeId::Reflector]);
    owned_by("mutation_outcome", patch.mutation_outcome.is_some(), &[NodeId::MutationAuditor]);
    owned_by("phase", patch.phase.is_some(), &[NodeId::Reflector]);
    owned_by(
        "stop_reason",
        patch.stop_reason.is_some(),
        &[NodeId::Reflector, NodeId::MutationAuditor],
    );

    check_counters(node, prev, patch, &mut errors);
    check_decision(node, patch, &mut errors);

    if node == NodeId::TestAuthor && patch.feedback.as_deref() != Some("") {
        errors.push("test_author must clear feedback".to_string());
    }
    if node == NodeId::ProductOwner && !patch.reset_run {
        errors.push("product_owner must reset run counters".to_string());
    }

    errors
}

fn check_counters(
    node: NodeId,
    prev: &WorkflowState,
    patch: &StatePatch,
    errors: &mut Vec<String>,
) {
    if let Some(count) = patch.replan_count
        && count != prev.replan_count + 1
    {
        errors.push(format!(
            "replan_count must advance by one ({} -> {count})",
            prev.replan_count
        ));
    }

    match (node, patch.iteration) {
        (NodeId::Reflector, Some(iteration)) if iteration != prev.iteration + 1 => {
            errors.push(format!(
                "iteration must advance by one ({} -> {iteration})",
                prev.iteration
            ));
        }
        (NodeId::Reflector, None) => errors.push("reflector must advance iteration".to_string()),
        _ => {}
    }

    if patch.phase == Some(Phase::Dev) {
        errors.push("phase must never revert to dev".to_string());
    }
    if node == NodeId::MutationAuditor && patch.mutation_outcome.is_none() {
        errors.push("mutation_auditor must record an outcome".to_string());
    }
}

fn check_decision(node: NodeId, patch: &StatePatch, errors: &mut Vec<String>) {
    match patch.next_action {
        Some(action) if !node.decisions().contains(&action) => {
            errors.push(format!("{node} must not emit {action}"));
        }
        None if node.is_decision_bearing() => {
            errors.push(format!("{node} must emit a routing decision"));
        }
        _ => {}
    }

    let finishing = patch.next_action == Some(NextAction::Finish);
    if finishing != patch.stop_reason.is_some() {
        errors.push("stop_reason must accompany exactly the finish decision".to_string());
    }
}
