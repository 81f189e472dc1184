//! Development cycle: test author and implementer.

use anyhow::Result;
use tracing::{debug, instrument};

use super::NodeContext;
use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::core::types::{CodeResult, TestResult};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;

/// Write (or extend, in the mutation phase) the test suite. Always consumes feedback.
#[instrument(skip_all, fields(phase = state.phase.as_str()))]
pub(super) fn test_author<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let result: TestResult = ctx.structured(NodeId::TestAuthor, state)?;
    debug!(thought = %result.thought, bytes = result.test_code.len(), "test suite written");
    Ok(StatePatch {
        test_artifact: Some(result.test_code),
        feedback: Some(String::new()),
        ..StatePatch::default()
    })
}

#[instrument(skip_all, fields(iteration = state.iteration))]
pub(super) fn implementer<G: Generator, S: Sandbox>(
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    let result: CodeResult = ctx.structured(NodeId::Implementer, state)?;
    debug!(thought = %result.thought, bytes = result.impl_code.len(), "implementation written");
    Ok(StatePatch {
        impl_artifact: Some(result.impl_code),
        ..StatePatch::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Phase;
    use crate::io::prompt::PromptBuilder;
    use crate::nodes::fixtures::context;
    use crate::test_support::{ScriptedGenerator, ScriptedSandbox, sample_spec};

    /// Verifies the test author clears feedback and its prompt carries the mutation note.
    #[test]
    fn test_author_consumes_mutation_feedback() {
        let generator = ScriptedGenerator::new().json(
            NodeId::TestAuthor,
            &TestResult {
                thought: "add boundary case".to_string(),
                test_code: "def test_boundary(): ...".to_string(),
            },
        );
        let sandbox = ScriptedSandbox::new(Vec::new());
        let prompts = PromptBuilder::new(10_000);
        let ctx = context(&generator, &sandbox, &prompts);
        let mut state = WorkflowState::new("req");
        state.spec = Some(sample_spec());
        state.phase = Phase::Mutation;
        state.feedback = "Survived: off by one".to_string();

        let patch = test_author(&ctx, &state).expect("patch");
        assert_eq!(patch.test_artifact.as_deref(), Some("def test_boundary(): ..."));
        assert_eq!(patch.feedback.as_deref(), Some(""));

        let requests = generator.requests();
        assert!(requests[0].prompt.contains("Mutation Check Failed: Survived: off by one."));
        assert!(requests[0].schema.is_some());
    }

    /// Verifies the implementer leaves feedback untouched.
    #[test]
    fn implementer_keeps_feedback() {
        let generator = ScriptedGenerator::new().json(
            NodeId::Implementer,
            &CodeResult {
                thought: "fix division".to_string(),
                impl_code: "def average(values): ...".to_string(),
            },
        );
        let sandbox = ScriptedSandbox::new(Vec::new());
        let prompts = PromptBuilder::new(10_000);
        let ctx = context(&generator, &sandbox, &prompts);
        let mut state = WorkflowState::new("req");
        state.spec = Some(sample_spec());
        state.feedback = "handle empty input".to_string();

        let patch = implementer(&ctx, &state).expect("patch");
        assert_eq!(patch.impl_artifact.as_deref(), Some("def average(values): ..."));
        assert_eq!(patch.feedback, None);
        assert!(generator.requests()[0].prompt.contains("handle empty input"));
    }
}
