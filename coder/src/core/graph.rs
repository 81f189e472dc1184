//! Workflow graph: node identities and the validated transition table.
//!
//! Every transition is an explicit `(node, decision) -> route` entry. Nodes
//! that make no decision have exactly one unconditional edge; decision-bearing
//! nodes have one conditional edge per action they may emit.
//! [`TransitionTable::validate`] runs before a workflow starts and rejects
//! missing edges, dead branches, unreachable nodes, and artifact producers
//! whose output is not executed before the next decision.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use anyhow::{Result, anyhow, bail};
use serde::Serialize;

use crate::core::types::NextAction;

/// A single-purpose step of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    ProductOwner,
    Architect,
    Critic,
    SpecCompiler,
    TestAuthor,
    Implementer,
    Executor,
    Reflector,
    MutationAuditor,
}

impl NodeId {
    pub const ALL: [NodeId; 9] = [
        NodeId::ProductOwner,
        NodeId::Architect,
        NodeId::Critic,
        NodeId::SpecCompiler,
        NodeId::TestAuthor,
        NodeId::Implementer,
        NodeId::Executor,
        NodeId::Reflector,
        NodeId::MutationAuditor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::ProductOwner => "product_owner",
            NodeId::Architect => "architect",
            NodeId::Critic => "critic",
            NodeId::SpecCompiler => "spec_compiler",
            NodeId::TestAuthor => "test_author",
            NodeId::Implementer => "implementer",
            NodeId::Executor => "executor",
            NodeId::Reflector => "reflector",
            NodeId::MutationAuditor => "mutation_auditor",
        }
    }

    /// Actions this node may emit. Empty for nodes routed unconditionally.
    pub fn decisions(self) -> &'static [NextAction] {
        match self {
            NodeId::SpecCompiler => &[NextAction::ReplanInternal, NextAction::Proceed],
            NodeId::Reflector => &[
                NextAction::RetryCode,
                NextAction::RetryTest,
                NextAction::Replan,
                NextAction::MutationCheck,
                NextAction::Finish,
            ],
            NodeId::MutationAuditor => &[NextAction::RetryTest, NextAction::Finish],
            NodeId::ProductOwner
            | NodeId::Architect
            | NodeId::Critic
            | NodeId::TestAuthor
            | NodeId::Implementer
            | NodeId::Executor => &[],
        }
    }

    pub fn is_decision_bearing(self) -> bool {
        !self.decisions().is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where execution goes after a node returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Node(NodeId),
    End,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Node(node) => fmt::Display::fmt(node, f),
            Route::End => f.write_str("end"),
        }
    }
}

/// One row of the transition table, used for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub on: Option<NextAction>,
    pub to: Route,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.on {
            Some(action) => write!(f, "{} --{}--> {}", self.from, action, self.to),
            None => write!(f, "{} -----> {}", self.from, self.to),
        }
    }
}

/// Explicit state-transition table: `node x decision -> route`.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    entry: NodeId,
    unconditional: BTreeMap<NodeId, Route>,
    conditional: BTreeMap<(NodeId, NextAction), Route>,
}

impl TransitionTable {
    pub fn new(entry: NodeId) -> Self {
        Self {
            entry,
            unconditional: BTreeMap::new(),
            conditional: BTreeMap::new(),
        }
    }

    pub fn always(mut self, from: NodeId, to: Route) -> Self {
        self.unconditional.insert(from, to);
        self
    }

    pub fn on(mut self, from: NodeId, action: NextAction, to: Route) -> Self {
        self.conditional.insert((from, action), to);
        self
    }

    /// The planning -> development -> execution -> audit workflow.
    pub fn standard() -> Self {
        use NodeId::{
            Architect, Critic, Executor, Implementer, MutationAuditor, ProductOwner, Reflector,
            SpecCompiler, TestAuthor,
        };
        Self::new(ProductOwner)
            .always(ProductOwner, Route::Node(Architect))
            .always(Architect, Route::Node(Critic))
            .always(Critic, Route::Node(SpecCompiler))
            .on(SpecCompiler, NextAction::ReplanInternal, Route::Node(Architect))
            .on(SpecCompiler, NextAction::Proceed, Route::Node(TestAuthor))
            .always(TestAuthor, Route::Node(Implementer))
            .always(Implementer, Route::Node(Executor))
            .always(Executor, Route::Node(Reflector))
            .on(Reflector, NextAction::RetryCode, Route::Node(Implementer))
            .on(Reflector, NextAction::RetryTest, Route::Node(TestAuthor))
            .on(Reflector, NextAction::Replan, Route::Node(Architect))
            .on(Reflector, NextAction::MutationCheck, Route::Node(MutationAuditor))
            .on(Reflector, NextAction::Finish, Route::End)
            .on(MutationAuditor, NextAction::RetryTest, Route::Node(TestAuthor))
            .on(MutationAuditor, NextAction::Finish, Route::End)
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Look up the next route after `from` returned with `action`.
    pub fn route(&self, from: NodeId, action: Option<NextAction>) -> Result<Route> {
        match (from.is_decision_bearing(), action) {
            (true, Some(action)) => self
                .conditional
                .get(&(from, action))
                .copied()
                .ok_or_else(|| anyhow!("no edge from {from} on {action}")),
            (true, None) => bail!("{from} returned without a routing decision"),
            (false, Some(action)) => {
                bail!("{from} emitted {action} but routes unconditionally")
            }
            (false, None) => self
                .unconditional
                .get(&from)
                .copied()
                .ok_or_else(|| anyhow!("no edge from {from}")),
        }
    }

    /// All edges in deterministic order (node order, then action order).
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for node in NodeId::ALL {
            if let Some(to) = self.unconditional.get(&node) {
                edges.push(Edge {
                    from: node,
                    on: None,
                    to: *to,
                });
            }
            for ((from, action), to) in &self.conditional {
                if *from == node {
                    edges.push(Edge {
                        from: node,
                        on: Some(*action),
                        to: *to,
                    });
                }
            }
        }
        edges
    }

    /// Check completeness and structural invariants of the table.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for node in NodeId::ALL {
            if node.is_decision_bearing() {
                if self.unconditional.contains_key(&node) {
                    errors.push(format!(
                        "{node} is decision-bearing but has an unconditional edge"
                    ));
                }
                for action in node.decisions() {
                    if !self.conditional.contains_key(&(node, *action)) {
                        errors.push(format!("missing edge: {node} on {action}"));
                    }
                }
            } else if !self.unconditional.contains_key(&node) {
                errors.push(format!("missing edge: {node} has no successor"));
            }
        }

        for (from, action) in self.conditional.keys() {
            if !from.decisions().contains(action) {
                errors.push(format!("dead branch: {from} never emits {action}"));
            }
        }

        let reachable = self.reachable_from_entry();
        for node in NodeId::ALL {
            if !reachable.contains(&node) {
                errors.push(format!("{node} is unreachable from {}", self.entry));
            }
        }
        if !self.edges().iter().any(|edge| edge.to == Route::End) {
            errors.push("no edge reaches the terminal route".to_string());
        }

        for producer in [NodeId::TestAuthor, NodeId::Implementer] {
            if let Err(err) = self.check_flows_to_executor(producer) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            bail!("invalid transition table:\n- {}", errors.join("\n- "));
        }
        Ok(())
    }

    fn reachable_from_entry(&self) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.entry]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            for edge in self.edges() {
                if edge.from == node
                    && let Route::Node(next) = edge.to
                {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// An artifact producer must reach the executor through unconditional
    /// edges before any node that could read a stale artifact decides.
    fn check_flows_to_executor(&self, producer: NodeId) -> std::result::Result<(), String> {
        let mut current = producer;
        for _ in 0..NodeId::ALL.len() {
            if current == NodeId::Executor {
                return Ok(());
            }
            if current.is_decision_bearing() {
                return Err(format!(
                    "{producer} reaches decision node {current} before the executor"
                ));
            }
            match self.unconditional.get(&current) {
                Some(Route::Node(next)) => current = *next,
                Some(Route::End) | None => {
                    return Err(format!("{producer} never reaches the executor"));
                }
            }
        }
        Err(format!("{producer} cycles without reaching the executor"))
    }
}
