//! Scripted collaborators and fixtures for workflow tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::graph::NodeId;
use crate::core::types::{MutantResult, Param, SpecRecord, SpecVerdict};
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::sandbox::{Sandbox, SandboxRun};

/// Generator that replays queued replies in order.
///
/// Each reply is tied to the role expected to request it; a request from any
/// other role panics so scripting mistakes fail loudly.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<(NodeId, Result<String, String>)>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw text reply.
    pub fn text(self, role: NodeId, reply: &str) -> Self {
        self.replies
            .borrow_mut()
            .push_back((role, Ok(reply.to_string())));
        self
    }

    /// Queue a reply serialized as JSON.
    pub fn json<T: Serialize>(self, role: NodeId, value: &T) -> Self {
        let reply = serde_json::to_string(value).expect("serialize scripted reply");
        self.text(role, &reply)
    }

    /// Queue a backend failure.
    pub fn fail(self, role: NodeId, message: &str) -> Self {
        self.replies
            .borrow_mut()
            .push_back((role, Err(message.to_string())));
        self
    }

    /// Queue the four planning replies for a spec accepted on the first pass.
    pub fn planning_accepted(self) -> Self {
        self.text(NodeId::ProductOwner, "As a user I want the average of my numbers.")
            .text(NodeId::Architect, "def average(values: list[float]) -> float")
            .text(NodeId::Critic, "Looks sound.")
            .json(NodeId::SpecCompiler, &verdict(false, ""))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls_for(&self, role: NodeId) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.role == role)
            .count()
    }

    pub fn assert_drained(&self) {
        let remaining = self.replies.borrow();
        assert!(
            remaining.is_empty(),
            "scripted generator has {} unused replies, next for {}",
            remaining.len(),
            remaining.front().map_or("-", |(role, _)| role.as_str())
        );
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let (role, reply) = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted reply left for {}", request.role));
        assert_eq!(
            role, request.role,
            "scripted reply for {role} requested by {}",
            request.role
        );
        reply.map_err(|msg| anyhow!(msg))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxCallKind {
    Run,
    Probe,
}

/// One recorded sandbox invocation. `implementation` is what the checker saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCall {
    pub kind: SandboxCallKind,
    pub implementation: String,
    pub tests: String,
    pub timeout: Duration,
}

/// Sandbox that replays queued runs and simulates the on-disk implementation file.
#[derive(Default)]
pub struct ScriptedSandbox {
    runs: RefCell<VecDeque<SandboxRun>>,
    calls: RefCell<Vec<SandboxCall>>,
    on_disk: RefCell<String>,
}

impl ScriptedSandbox {
    pub fn new(runs: Vec<SandboxRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.borrow().clone()
    }

    pub fn on_disk(&self) -> String {
        self.on_disk.borrow().clone()
    }

    pub fn set_on_disk(&self, implementation: &str) {
        *self.on_disk.borrow_mut() = implementation.to_string();
    }

    pub fn assert_drained(&self) {
        let remaining = self.runs.borrow().len();
        assert_eq!(remaining, 0, "scripted sandbox has {remaining} unused runs");
    }

    fn next_run(&self) -> SandboxRun {
        self.runs
            .borrow_mut()
            .pop_front()
            .expect("no scripted sandbox run left")
    }

    fn record(&self, kind: SandboxCallKind, tests: &str, timeout: Duration) {
        self.calls.borrow_mut().push(SandboxCall {
            kind,
            implementation: self.on_disk(),
            tests: tests.to_string(),
            timeout,
        });
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, implementation: &str, tests: &str, timeout: Duration) -> SandboxRun {
        self.set_on_disk(implementation);
        self.record(SandboxCallKind::Run, tests, timeout);
        self.next_run()
    }

    fn probe_mutant(
        &self,
        original: &str,
        mutant: &str,
        tests: &str,
        timeout: Duration,
    ) -> SandboxRun {
        self.set_on_disk(mutant);
        self.record(SandboxCallKind::Probe, tests, timeout);
        let run = self.next_run();
        self.set_on_disk(original);
        run
    }
}

pub fn sample_spec() -> SpecRecord {
    SpecRecord {
        function_name: "average".to_string(),
        inputs: vec![Param {
            name: "values".to_string(),
            ty: "list[float]".to_string(),
        }],
        output_type: "float".to_string(),
        description: "Arithmetic mean of the values.".to_string(),
        requirements: vec!["returns sum(values) / len(values)".to_string()],
        edge_cases: vec!["empty list raises ValueError".to_string()],
    }
}

pub fn verdict(needs_replan: bool, reason: &str) -> SpecVerdict {
    SpecVerdict {
        spec: sample_spec(),
        needs_replan,
        replan_reason: reason.to_string(),
    }
}

/// A reflector reply. `action` is raw so out-of-set values can be scripted.
pub fn decision(action: &str, feedback: &str) -> Value {
    json!({
        "analysis": format!("run analysed, choosing {action}"),
        "action": action,
        "feedback": feedback,
    })
}

pub fn mutant(code: &str, description: &str) -> MutantResult {
    MutantResult {
        mutant_code: code.to_string(),
        description: description.to_string(),
    }
}

pub fn passing() -> SandboxRun {
    SandboxRun {
        log: "=== stdout ===\n3 passed\n".to_string(),
        succeeded: true,
        timed_out: false,
    }
}

pub fn failing(log: &str) -> SandboxRun {
    SandboxRun::failed(log)
}
