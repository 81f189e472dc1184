//! Shared workflow state and the per-node patch merged into it.
//!
//! Nodes never mutate [`WorkflowState`] directly. Each node reads a snapshot and
//! returns a [`StatePatch`]; the orchestrator validates the patch
//! (see [`crate::core::invariants`]) and is the only caller of
//! [`WorkflowState::apply`].

use serde::Serialize;

use crate::core::types::{MutationOutcome, NextAction, Phase, SpecRecord, StopReason};

/// Prose notes written by the three planning-prose roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanningNotes {
    pub product: String,
    pub architect: String,
    pub critic: String,
}

/// The single record threaded through every node of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowState {
    pub requirements: String,
    pub planning: PlanningNotes,
    pub spec: Option<SpecRecord>,
    /// Set when the compiler force-accepted a spec after exhausting replans.
    pub spec_degraded: bool,
    pub replan_count: u32,
    pub test_artifact: String,
    pub impl_artifact: String,
    pub exec_log: String,
    pub last_run_passed: Option<bool>,
    pub feedback: String,
    pub iteration: u32,
    pub mutation_log: Vec<MutationOutcome>,
    pub phase: Phase,
    pub next_action: Option<NextAction>,
    pub stop_reason: Option<StopReason>,
}

impl WorkflowState {
    pub fn new(requirements: impl Into<String>) -> Self {
        Self {
            requirements: requirements.into(),
            planning: PlanningNotes::default(),
            spec: None,
            spec_degraded: false,
            replan_count: 0,
            test_artifact: String::new(),
            impl_artifact: String::new(),
            exec_log: String::new(),
            last_run_passed: None,
            feedback: String::new(),
            iteration: 0,
            mutation_log: Vec::new(),
            phase: Phase::Dev,
            next_action: None,
            stop_reason: None,
        }
    }

    /// Merge a validated patch. Run resets apply before field overwrites.
    pub fn apply(&mut self, patch: StatePatch) {
        if patch.reset_run {
            self.replan_count = 0;
            self.iteration = 0;
            self.mutation_log.clear();
            self.phase = Phase::Dev;
            self.feedback.clear();
            self.spec_degraded = false;
            self.stop_reason = None;
        }
        if let Some(notes) = patch.product_notes {
            self.planning.product = notes;
        }
        if let Some(notes) = patch.architect_notes {
            self.planning.architect = notes;
        }
        if let Some(notes) = patch.critic_notes {
            self.planning.critic = notes;
        }
        if let Some(spec) = patch.spec {
            self.spec = spec;
        }
        if let Some(degraded) = patch.spec_degraded {
            self.spec_degraded = degraded;
        }
        if let Some(count) = patch.replan_count {
            self.replan_count = count;
        }
        if let Some(tests) = patch.test_artifact {
            self.test_artifact = tests;
        }
        if let Some(implementation) = patch.impl_artifact {
            self.impl_artifact = implementation;
        }
        if let Some(log) = patch.exec_log {
            self.exec_log = log;
        }
        if let Some(passed) = patch.last_run_passed {
            self.last_run_passed = Some(passed);
        }
        if let Some(feedback) = patch.feedback {
            self.feedback = feedback;
        }
        if let Some(iteration) = patch.iteration {
            self.iteration = iteration;
        }
        if let Some(outcome) = patch.mutation_outcome {
            self.mutation_log.push(outcome);
        }
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }
        if let Some(action) = patch.next_action {
            self.next_action = Some(action);
        }
        if let Some(reason) = patch.stop_reason {
            self.stop_reason = Some(reason);
        }
    }

    /// Consume the routing signal so it cannot leak into a later transition.
    pub fn take_next_action(&mut self) -> Option<NextAction> {
        self.next_action.take()
    }
}

/// Partial update returned by a node.
///
/// `None` leaves a field untouched. `spec` is doubly optional so the compiler
/// can clear it (`Some(None)`). `mutation_outcome` appends to the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub reset_run: bool,
    pub product_notes: Option<String>,
    pub architect_notes: Option<String>,
    pub critic_notes: Option<String>,
    pub spec: Option<Option<SpecRecord>>,
    pub spec_degraded: Option<bool>,
    pub replan_count: Option<u32>,
    pub test_artifact: Option<String>,
    pub impl_artifact: Option<String>,
    pub exec_log: Option<String>,
    pub last_run_passed: Option<bool>,
    pub feedback: Option<String>,
    pub iteration: Option<u32>,
    pub mutation_outcome: Option<MutationOutcome>,
    pub phase: Option<Phase>,
    pub next_action: Option<NextAction>,
    pub stop_reason: Option<StopReason>,
}

impl StatePatch {
    /// Names of the fields this patch writes, in declaration order.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.reset_run {
            fields.push("reset_run");
        }
        let flags = [
            ("product_notes", self.product_notes.is_some()),
            ("architect_notes", self.architect_notes.is_some()),
            ("critic_notes", self.critic_notes.is_some()),
            ("spec", self.spec.is_some()),
            ("spec_degraded", self.spec_degraded.is_some()),
            ("replan_count", self.replan_count.is_some()),
            ("test_artifact", self.test_artifact.is_some()),
            ("impl_artifact", self.impl_artifact.is_some()),
            ("exec_log", self.exec_log.is_some()),
            ("last_run_passed", self.last_run_passed.is_some()),
            ("feedback", self.feedback.is_some()),
            ("iteration", self.iteration.is_some()),
            ("mutation_outcome", self.mutation_outcome.is_some()),
            ("phase", self.phase.is_some()),
            ("next_action", self.next_action.is_some()),
            ("stop_reason", self.stop_reason.is_some()),
        ];
        fields.extend(flags.iter().filter(|(_, set)| *set).map(|(name, _)| *name));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_applies_before_overwrites() {
        let mut state = WorkflowState::new("req");
        state.iteration = 7;
        state.replan_count = 2;
        state.phase = Phase::Mutation;
        state.mutation_log.push(MutationOutcome::Survived);
        state.feedback = "stale".to_string();

        state.apply(StatePatch {
            reset_run: true,
            product_notes: Some("stories".to_string()),
            ..StatePatch::default()
        });

        assert_eq!(state.iteration, 0);
        assert_eq!(state.replan_count, 0);
        assert_eq!(state.phase, Phase::Dev);
        assert!(state.mutation_log.is_empty());
        assert!(state.feedback.is_empty());
        assert_eq!(state.planning.product, "stories");
        assert_eq!(state.requirements, "req");
    }

    #[test]
    fn spec_can_be_cleared_and_mutations_append() {
        let mut state = WorkflowState::new("req");
        state.apply(StatePatch {
            spec: Some(None),
            mutation_outcome: Some(MutationOutcome::Killed),
            ..StatePatch::default()
        });
        state.apply(StatePatch {
            mutation_outcome: Some(MutationOutcome::Survived),
            ..StatePatch::default()
        });
        assert!(state.spec.is_none());
        assert_eq!(
            state.mutation_log,
            vec![MutationOutcome::Killed, MutationOutcome::Survived]
        );
    }

    #[test]
    fn next_action_is_consumed_once() {
        let mut state = WorkflowState::new("req");
        state.apply(StatePatch {
            next_action: Some(NextAction::Proceed),
            ..StatePatch::default()
        });
        assert_eq!(state.take_next_action(), Some(NextAction::Proceed));
        assert_eq!(state.take_next_action(), None);
    }

    #[test]
    fn touched_fields_lists_written_fields() {
        let patch = StatePatch {
            test_artifact: Some(String::new()),
            feedback: Some(String::new()),
            ..StatePatch::default()
        };
        assert_eq!(patch.touched_fields(), vec!["test_artifact", "feedback"]);
    }
}
