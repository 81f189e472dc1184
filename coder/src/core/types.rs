//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between nodes, the router, and the
//! generation collaborator. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse workflow stage. Transitions `Dev -> Mutation` at most once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Dev,
    Mutation,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Dev => "dev",
            Phase::Mutation => "mutation",
        }
    }
}

/// Routing signal set by a decision-bearing node and consumed by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RetryCode,
    RetryTest,
    Replan,
    ReplanInternal,
    Proceed,
    MutationCheck,
    Finish,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::RetryCode => "retry_code",
            NextAction::RetryTest => "retry_test",
            NextAction::Replan => "replan",
            NextAction::ReplanInternal => "replan_internal",
            NextAction::Proceed => "proceed",
            NextAction::MutationCheck => "mutation_check",
            NextAction::Finish => "finish",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single mutation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The test suite passed against the mutant (defect not caught).
    Survived,
    /// The test suite failed against the mutant (defect caught).
    Killed,
    /// The mutant did not differ from the implementation, so nothing was probed.
    Inconclusive,
}

/// Why a workflow run reached the terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Tests passed while in the mutation phase.
    TestsPassed,
    /// The mutation auditor's defect was caught by the test suite.
    MutantKilled,
    /// Tests passed but the auditor could not produce a distinct mutant.
    AuditInconclusive,
    /// The reflector hit the global iteration cap.
    IterationLimit,
    /// The reflector received a decision outside the closed action set.
    UnrecognizedDecision,
    /// The run-level wall-clock budget elapsed.
    DeadlineExceeded,
}

impl StopReason {
    /// Whether the run ended on a passing verdict rather than a safety cap.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            StopReason::TestsPassed | StopReason::MutantKilled | StopReason::AuditInconclusive
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::TestsPassed => "tests_passed",
            StopReason::MutantKilled => "mutant_killed",
            StopReason::AuditInconclusive => "audit_inconclusive",
            StopReason::IterationLimit => "iteration_limit",
            StopReason::UnrecognizedDecision => "unrecognized_decision",
            StopReason::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter of the function under development.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// The finalized development contract produced by the spec compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRecord {
    pub function_name: String,
    pub inputs: Vec<Param>,
    pub output_type: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub edge_cases: Vec<String>,
}

/// Structured compiler response: a spec plus the replan verdict.
///
/// `needs_replan` and `replan_reason` only carry the verdict to the compiler
/// node; they never enter the durable workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecVerdict {
    #[serde(flatten)]
    pub spec: SpecRecord,
    pub needs_replan: bool,
    #[serde(default)]
    pub replan_reason: String,
}

/// Structured test-author response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub thought: String,
    pub test_code: String,
}

/// Structured implementer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResult {
    pub thought: String,
    pub impl_code: String,
}

/// Action proposed by the reflector's generation call.
///
/// Values outside the closed set deserialize to `Unrecognized` instead of
/// failing, so the reflector can apply its fail-safe default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    RetryCode,
    RetryTest,
    Replan,
    MutationCheck,
    Finish,
    #[serde(other)]
    Unrecognized,
}

/// Structured reflector response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub analysis: String,
    pub action: DecisionAction,
    pub feedback: String,
}

/// Structured mutation-auditor response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantResult {
    pub mutant_code: String,
    pub description: String,
}
