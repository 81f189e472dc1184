//! Workflow nodes.
//!
//! Each node reads a [`WorkflowState`] snapshot and returns a [`StatePatch`].
//! Nodes never merge their own patches; see [`crate::workflow`].

mod development;
mod execution;
mod mutation;
mod planning;

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::core::budget::{DeadlineExceeded, Limits, clamp_to_budget, remaining_budget};
use crate::core::graph::NodeId;
use crate::core::state::{StatePatch, WorkflowState};
use crate::io::generator::{Generator, StructuredReply, generate_structured, generate_text};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::sandbox::Sandbox;

/// Collaborators and budgets shared by every node of one run.
pub struct NodeContext<'a, G, S> {
    pub generator: &'a G,
    pub sandbox: &'a S,
    pub prompts: &'a PromptBuilder,
    pub limits: Limits,
    pub generator_timeout: Duration,
    pub sandbox_timeout: Duration,
    pub deadline: Instant,
}

impl<G: Generator, S: Sandbox> NodeContext<'_, G, S> {
    fn prompt(&self, role: NodeId, state: &WorkflowState) -> Result<String> {
        Ok(self
            .prompts
            .build(role, &PromptInputs::from_state(state))?
            .render())
    }

    /// Request prose for `role` within the remaining run budget.
    fn text(&self, role: NodeId, state: &WorkflowState) -> Result<String> {
        let prompt = self.prompt(role, state)?;
        let timeout = clamp_to_budget(self.generator_timeout, self.deadline)?;
        generate_text(self.generator, role, prompt, timeout).map_err(|err| self.expire(err))
    }

    /// Request a typed reply for `role` within the remaining run budget.
    fn structured<T: StructuredReply>(&self, role: NodeId, state: &WorkflowState) -> Result<T> {
        let prompt = self.prompt(role, state)?;
        let timeout = clamp_to_budget(self.generator_timeout, self.deadline)?;
        generate_structured(self.generator, role, prompt, timeout).map_err(|err| self.expire(err))
    }

    /// Sandbox timeout clamped to the remaining run budget.
    fn checker_timeout(&self) -> Result<Duration> {
        clamp_to_budget(self.sandbox_timeout, self.deadline)
    }

    /// A call that failed because the run budget ran out reports the deadline instead.
    fn expire(&self, err: anyhow::Error) -> anyhow::Error {
        if remaining_budget(self.deadline).is_err() {
            DeadlineExceeded.into()
        } else {
            err
        }
    }
}

/// Run one node against the current state snapshot.
pub fn run_node<G: Generator, S: Sandbox>(
    node: NodeId,
    ctx: &NodeContext<'_, G, S>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    match node {
        NodeId::ProductOwner => planning::product_owner(ctx, state),
        NodeId::Architect => planning::architect(ctx, state),
        NodeId::Critic => planning::critic(ctx, state),
        NodeId::SpecCompiler => planning::spec_compiler(ctx, state),
        NodeId::TestAuthor => development::test_author(ctx, state),
        NodeId::Implementer => development::implementer(ctx, state),
        NodeId::Executor => execution::executor(ctx, state),
        NodeId::Reflector => execution::reflector(ctx, state),
        NodeId::MutationAuditor => mutation::mutation_auditor(ctx, state),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::time::{Duration, Instant};

    use super::NodeContext;
    use crate::core::budget::Limits;
    use crate::io::prompt::PromptBuilder;
    use crate::test_support::{ScriptedGenerator, ScriptedSandbox};

    pub fn context<'a>(
        generator: &'a ScriptedGenerator,
        sandbox: &'a ScriptedSandbox,
        prompts: &'a PromptBuilder,
    ) -> NodeContext<'a, ScriptedGenerator, ScriptedSandbox> {
        NodeContext {
            generator,
            sandbox,
            prompts,
            limits: Limits::default(),
            generator_timeout: Duration::from_secs(60),
            sandbox_timeout: Duration::from_secs(10),
            deadline: Instant::now() + Duration::from_secs(600),
        }
    }
}
