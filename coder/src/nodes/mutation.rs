//! Mutation auditor: probe test-suite strength with one injected defect.

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::NodeContext;
use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::core::types::{MutantResult, MutationOutcome, NextAction, StopReason};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;

/// Run the unchanged suite against a single-defect mutant of the implementation.
///
/// The sandbox restores the original implementation after the probe; the
/// patch never carries an implementation, so the artifact in state is untouched.
#[instrument(skip_all, fields(probes = state.mutation_log.len()))]
pub(super) fn mutation_auditor<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let mutant: MutantResult = ctx.structured(NodeId::MutationAuditor, state)?;
    if same_code(&mutant.mutant_code, &state.impl_artifact) {
        warn!(defect = %mutant.description, "mutant does not change the implementation");
        return Ok(StatePatch {
            mutation_outcome: Some(MutationOutcome::Inconclusive),
            feedback: Some(format!(
                "Mutation audit inconclusive: the mutant ({}) does not change the code.",
                mutant.description
            )),
            next_action: Some(NextAction::Finish),
            stop_reason: Some(StopReason::AuditInconclusive),
            ..StatePatch::default()
        });
    }

    let timeout = ctx.checker_timeout()?;
    let run = ctx.sandbox.probe_mutant(
        &state.impl_artifact,
        &mutant.mutant_code,
        &state.test_artifact,
        timeout,
    );

    if run.succeeded {
        info!(defect = %mutant.description, "mutant survived");
        Ok(StatePatch {
            mutation_outcome: Some(MutationOutcome::Survived),
            feedback: Some(format!("Survived: {}", mutant.description)),
            next_action: Some(NextAction::RetryTest),
            ..StatePatch::default()
        })
    } else {
        info!(defect = %mutant.description, "mutant killed");
        Ok(StatePatch {
            mutation_outcome: Some(MutationOutcome::Killed),
            feedback: Some("passed".to_string()),
            next_action: Some(NextAction::Finish),
            stop_reason: Some(StopReason::MutantKilled),
            ..StatePatch::default()
        })
    }
}

/// Equal up to trailing whitespace, blank lines and full-line `#` comments.
///
/// Leading indentation is kept: moving a statement between blocks is a real mutation.
fn same_code(a: &str, b: &str) -> bool {
    fn significant(code: &str) -> impl Iterator<Item = &str> {
        code.lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && !line.trim_start().starts_with('#'))
    }
    significant(a).eq(significant(b))
}
