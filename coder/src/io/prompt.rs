//! Prompt pack builder for role-specific generation requests.

use anyhow::{Result, anyhow};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::budget::Limits;
use crate::core::graph::NodeId;
use crate::core::state::WorkflowState;
use crate::core::types::SpecRecord;

const TEMPLATES: [(NodeId, &str); 8] = [
    (NodeId::ProductOwner, include_str!("prompts/product_owner.md")),
    (NodeId::Architect, include_str!("prompts/architect.md")),
    (NodeId::Critic, include_str!("prompts/critic.md")),
    (NodeId::SpecCompiler, include_str!("prompts/spec_compiler.md")),
    (NodeId::TestAuthor, include_str!("prompts/test_author.md")),
    (NodeId::Implementer, include_str!("prompts/implementer.md")),
    (NodeId::Reflector, include_str!("prompts/reflector.md")),
    (NodeId::MutationAuditor, include_str!("prompts/mutation_auditor.md")),
];

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Full section content including header.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

const SECTION_SEPARATOR: &str = "\n\n";

/// Byte length of `sections` once joined by [`render_sections`].
fn rendered_len(sections: &[ParsedSection]) -> usize {
    let content: usize = sections.iter().map(|s| s.content.len()).sum();
    content + SECTION_SEPARATOR.len() * sections.len().saturating_sub(1)
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: product -> requirements -> spec -> implementation -> tests -> feedback
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if rendered_len(sections) <= budget {
        return;
    }

    let drop_order = [
        "product",
        "requirements",
        "spec",
        "implementation",
        "tests",
        "feedback",
    ];
    for key in drop_order {
        if rendered_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the last section.
    let other_len = rendered_len(sections) - sections.last().map_or(0, |s| s.content.len());
    if let Some(last) = sections.last_mut() {
        let allowed = budget.saturating_sub(other_len);
        let before_len = last.content.len();
        if before_len > allowed {
            let keep = if allowed > 12 { allowed - 12 } else { allowed };
            let cut = floor_char_boundary(&last.content, keep);
            last.content.truncate(cut);
            if allowed > 12 {
                last.content.push_str("\n[truncated]");
            }
            debug!(
                section = last.key,
                before_len,
                after_len = last.content.len(),
                "truncated section for budget"
            );
        }
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Snapshot of the state fields prompts are rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub requirements: String,
    pub product: String,
    pub architect: String,
    pub critic: String,
    pub spec: Option<SpecRecord>,
    pub spec_degraded: bool,
    pub replan_count: u32,
    pub tests: String,
    pub implementation: String,
    pub exec_log: String,
    pub feedback: String,
    pub phase: &'static str,
    pub iteration: u32,
}

impl PromptInputs {
    pub fn from_state(state: &WorkflowState) -> Self {
        Self {
            requirements: state.requirements.clone(),
            product: state.planning.product.clone(),
            architect: state.planning.architect.clone(),
            critic: state.planning.critic.clone(),
            spec: state.spec.clone(),
            spec_degraded: state.spec_degraded,
            replan_count: state.replan_count,
            tests: state.test_artifact.clone(),
            implementation: state.impl_artifact.clone(),
            exec_log: state.exec_log.clone(),
            feedback: state.feedback.clone(),
            phase: state.phase.as_str(),
            iteration: state.iteration,
        }
    }

    fn spec_block(&self) -> String {
        let Some(spec) = &self.spec else {
            return "(no spec)".to_string();
        };
        let mut buf = format!("Function: {}(", spec.function_name);
        let params: Vec<String> = spec
            .inputs
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        buf.push_str(&params.join(", "));
        buf.push_str(&format!(") -> {}\n\n{}\n", spec.output_type, spec.description));
        if !spec.requirements.is_empty() {
            buf.push_str("\nRequirements:\n");
            for req in &spec.requirements {
                buf.push_str(&format!("- {req}\n"));
            }
        }
        if !spec.edge_cases.is_empty() {
            buf.push_str("\nEdge cases:\n");
            for case in &spec.edge_cases {
                buf.push_str(&format!("- {case}\n"));
            }
        }
        if self.spec_degraded {
            buf.push_str(
                "\nNote: this spec was accepted without a clean review. \
                 Prefer the most conservative reading where it is unclear.\n",
            );
        }
        buf
    }
}

/// Builds prompt packs within a byte budget, dropping less critical sections first.
pub struct PromptBuilder {
    budget_bytes: usize,
    limits: Limits,
    impl_file: String,
    test_file: String,
    env: Environment<'static>,
}

impl PromptBuilder {
    /// Create a builder with the given byte budget.
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        for (role, source) in TEMPLATES {
            env.add_template(role.as_str(), source)
                .expect("embedded prompt template should be valid");
        }
        Self {
            budget_bytes,
            limits: Limits::default(),
            impl_file: "implementation.py".to_string(),
            test_file: "test_suite.py".to_string(),
            env,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_artifact_files(mut self, impl_file: &str, test_file: &str) -> Self {
        self.impl_file = impl_file.to_string();
        self.test_file = test_file.to_string();
        self
    }

    /// Render the prompt for `role`.
    pub fn build(&self, role: NodeId, input: &PromptInputs) -> Result<PromptPack> {
        let template = self
            .env
            .get_template(role.as_str())
            .map_err(|_| anyhow!("{role} has no prompt template"))?;
        let impl_module = self
            .impl_file
            .rsplit_once('.')
            .map_or(self.impl_file.as_str(), |(stem, _)| stem);
        let spec_block = input.spec_block();
        let rendered = template.render(context! {
            requirements => input.requirements.trim(),
            product => input.product.trim(),
            architect => input.architect.trim(),
            critic => input.critic.trim(),
            spec_block => spec_block.trim(),
            replan_count => input.replan_count,
            max_replans => self.limits.max_replans,
            tests => input.tests.trim(),
            implementation => input.implementation.trim(),
            exec_log => input.exec_log.trim(),
            feedback => input.feedback.trim(),
            phase => input.phase,
            iteration => input.iteration,
            iteration_limit => self.limits.global_iteration_limit,
            impl_file => self.impl_file.as_str(),
            impl_module => impl_module,
            test_file => self.test_file.as_str(),
        })?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to the generator.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Param, Phase};

    fn state_with_spec() -> WorkflowState {
        let mut state = WorkflowState::new("average of a list");
        state.planning.product = "As a user I want the mean".to_string();
        state.planning.architect = "def average(values)".to_string();
        state.planning.critic = "empty list unclear".to_string();
        state.spec = Some(SpecRecord {
            function_name: "average".to_string(),
            inputs: vec![Param {
                name: "values".to_string(),
                ty: "list[float]".to_string(),
            }],
            output_type: "float".to_string(),
            description: "Arithmetic mean.".to_string(),
            requirements: vec!["returns the mean".to_string()],
            edge_cases: vec!["empty list raises ValueError".to_string()],
        });
        state
    }

    /// Verifies every decision and generation role has a template and the executor has none.
    #[test]
    fn templates_cover_generating_roles() {
        let builder = PromptBuilder::new(10_000);
        let input = PromptInputs::from_state(&state_with_spec());
        for role in NodeId::ALL {
            let result = builder.build(role, &input);
            assert_eq!(result.is_ok(), role != NodeId::Executor, "{role}");
        }
    }

    /// Verifies the test author receives mutation instructions only in the mutation phase.
    #[test]
    fn test_author_prompt_follows_phase() {
        let builder = PromptBuilder::new(10_000);
        let mut state = state_with_spec();
        state.feedback = "Survived: flipped < to <=".to_string();

        let dev = builder
            .build(NodeId::TestAuthor, &PromptInputs::from_state(&state))
            .expect("dev prompt")
            .render();
        assert!(dev.contains("every listed edge case"));
        assert!(dev.contains("Address this feedback: Survived"));
        assert!(!dev.contains("Mutation Check Failed"));

        state.phase = Phase::Mutation;
        state.test_artifact = "def test_mean(): ...".to_string();
        let mutation = builder
            .build(NodeId::TestAuthor, &PromptInputs::from_state(&state))
            .expect("mutation prompt")
            .render();
        assert!(mutation.contains(
            "Mutation Check Failed: Survived: flipped < to <=. Add tests to kill this mutant."
        ));
        assert!(mutation.contains("### Current Test Suite"));
        assert!(mutation.contains("from the implementation module (`implementation`)"));
    }

    /// Verifies the existing suite survives the budget in the mutation phase.
    #[test]
    fn mutation_phase_keeps_existing_suite_under_budget() {
        let mut state = state_with_spec();
        state.test_artifact = format!(
            "def test_mean(): assert average([1, 3]) == 2\n{}",
            "# fixture padding\n".repeat(20)
        );
        state.feedback = "Survived: dropped the division".to_string();
        let render = |state: &WorkflowState, budget: usize| {
            PromptBuilder::new(budget)
                .build(NodeId::TestAuthor, &PromptInputs::from_state(state))
                .expect("prompt")
                .render()
        };

        let dev_budget = render(&state, 100_000).len() - 50;
        assert!(!render(&state, dev_budget).contains("### Current Test Suite"));

        state.phase = Phase::Mutation;
        let mutation_budget = render(&state, 100_000).len() - 50;
        let mutation = render(&state, mutation_budget);
        assert!(mutation.contains("### Current Test Suite"));
        assert!(mutation.contains("def test_mean(): assert average([1, 3]) == 2"));
        assert!(mutation.len() <= mutation_budget);
    }

    /// Verifies the spec block lists signature and edge cases, and flags degraded specs.
    #[test]
    fn spec_block_renders_signature() {
        let mut state = state_with_spec();
        let block = PromptInputs::from_state(&state).spec_block();
        assert!(block.starts_with("Function: average(values: list[float]) -> float"));
        assert!(block.contains("- empty list raises ValueError"));
        assert!(!block.contains("without a clean review"));

        state.spec_degraded = true;
        let block = PromptInputs::from_state(&state).spec_block();
        assert!(block.contains("without a clean review"));
    }

    /// Verifies budget enforcement drops droppable sections before touching required ones.
    #[test]
    fn budget_drops_less_critical_sections_first() {
        let mut state = state_with_spec();
        state.impl_artifact = "x = 1\n".repeat(200);
        state.test_artifact = "def test_a(): pass".to_string();
        state.exec_log = "FAILED test_a".to_string();

        let pack = PromptBuilder::new(900)
            .build(NodeId::Reflector, &PromptInputs::from_state(&state))
            .expect("build");
        let content = pack.render();

        assert!(
            !content.contains("### Implementation"),
            "implementation should be dropped"
        );
        assert!(content.contains("### Reflector Contract"), "contract should remain");
        assert!(content.contains("FAILED test_a"), "log should remain");
        assert!(content.len() <= 900);
    }

    /// Verifies an oversized final section is truncated with a marker.
    #[test]
    fn oversized_log_is_truncated() {
        let mut state = state_with_spec();
        state.exec_log = "E".repeat(5_000);
        let content = PromptBuilder::new(1_200)
            .build(NodeId::Reflector, &PromptInputs::from_state(&state))
            .expect("build")
            .render();
        assert!(content.ends_with("[truncated]"));
        assert!(content.len() <= 1_200, "{} bytes", content.len());
    }

    /// Verifies the separators between sections count against the budget.
    #[test]
    fn budget_counts_section_separators() {
        let sections = parse_sections(
            "<!-- section:a required -->\naaaa\n<!-- section:b required -->\nbbbb\n\
             <!-- section:c droppable -->\ncccccccccccccccccccc",
        );
        assert_eq!(sections.len(), 3);
        assert_eq!(rendered_len(&sections), render_sections(&sections).len());

        for budget in [12, 20, 30] {
            let mut trimmed = sections.clone();
            apply_budget_to_sections(&mut trimmed, budget);
            let rendered = render_sections(&trimmed);
            assert!(rendered.len() <= budget, "{budget}: {rendered:?}");
        }
    }

    /// Verifies empty optional sections are omitted entirely.
    #[test]
    fn empty_feedback_section_is_omitted() {
        let state = state_with_spec();
        let content = PromptBuilder::new(10_000)
            .build(NodeId::Architect, &PromptInputs::from_state(&state))
            .expect("build")
            .render();
        assert!(!content.contains("### Review Feedback"));
        assert!(content.contains("### User Stories"));
    }
}
