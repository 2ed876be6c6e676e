//! Validated node table: the research graph as data.
//!
//! Built from [`NodeSpec`]s in phase order; the first node is the entry. Validation
//! rejects unknown targets, gate/edge mismatches and transitions that skip or leave
//! a phase illegally, so the engine never routes to something undefined at run time.

use std::collections::HashMap;

use crate::capability::CapabilityRegistry;
use crate::gate::{Edge, GateError};
use crate::state::{Phase, ResearchState, RunStatus};

use super::node::{NodeSpec, DONE};

/// Node table validation failure.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("node table is empty")]
    Empty,
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("node {node}: edge {edge} targets unknown node {target}")]
    UnknownTarget {
        node: String,
        edge: Edge,
        target: String,
    },
    #[error("node {node}: {reason}")]
    IllegalTransition { node: String, reason: String },
    #[error("node {node} invokes unregistered capability {capability}")]
    MissingCapability { node: String, capability: String },
    #[error(transparent)]
    Gate(#[from] GateError),
}

/// How a transition moved the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Forward within the phase.
    Advance,
    /// Back to an earlier (or the same) node of the phase; counts one iteration.
    LoopBack,
    /// Into the next phase; the iteration counter resets.
    NextPhase,
    Done,
}

/// Immutable, validated research graph.
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Vec<NodeSpec>,
    index: HashMap<String, usize>,
}

impl NodeTable {
    pub fn new(nodes: Vec<NodeSpec>) -> Result<Self, TableError> {
        if nodes.is_empty() {
            return Err(TableError::Empty);
        }
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() || node.id == DONE {
                return Err(TableError::DuplicateNode(node.id.clone()));
            }
        }
        let table = Self { nodes, index };
        table.validate()?;
        Ok(table)
    }

    pub fn entry(&self) -> &NodeSpec {
        &self.nodes[0]
    }

    pub fn get(&self, id: &str) -> Option<&NodeSpec> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration (phase) order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Every capability the table invokes must be registered.
    pub fn check_capabilities(&self, registry: &CapabilityRegistry) -> Result<(), TableError> {
        for node in &self.nodes {
            for capability in node.kind.capabilities() {
                if !registry.contains(capability) {
                    return Err(TableError::MissingCapability {
                        node: node.id.clone(),
                        capability: capability.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), TableError> {
        let mut last_phase = Phase::Exploration;
        for node in &self.nodes {
            if node.phase == Phase::Done {
                return Err(illegal(node, "no node may live in the done phase"));
            }
            if node.phase < last_phase {
                return Err(illegal(node, "nodes must be declared in phase order"));
            }
            last_phase = node.phase;

            match node.gate {
                Some(gate) => {
                    for required in [Edge::Proceed, gate.loop_edge()] {
                        if !node.edges.contains_key(&required) {
                            return Err(GateError::MissingEdge {
                                node: node.id.clone(),
                                gate,
                                edge: required,
                            }
                            .into());
                        }
                    }
                    for edge in node.edges.keys() {
                        if !gate.edges().contains(edge) || *edge == Edge::ForceAdvance {
                            return Err(GateError::UnexpectedEdge {
                                node: node.id.clone(),
                                gate,
                                edge: *edge,
                            }
                            .into());
                        }
                    }
                }
                None => {
                    if node.edges.len() != 1 || !node.edges.contains_key(&Edge::Proceed) {
                        return Err(illegal(node, "ungated nodes need exactly one proceed edge"));
                    }
                }
            }

            for (edge, target) in &node.edges {
                self.check_edge(node, *edge, target)?;
            }
        }
        Ok(())
    }

    fn check_edge(&self, node: &NodeSpec, edge: Edge, target: &str) -> Result<(), TableError> {
        if target == DONE {
            if node.phase != Phase::Critique || edge != Edge::Proceed {
                return Err(illegal(node, "only a critique-phase proceed edge may finish"));
            }
            return Ok(());
        }
        let to = self.get(target).ok_or_else(|| TableError::UnknownTarget {
            node: node.id.clone(),
            edge,
            target: target.to_string(),
        })?;
        let same_phase = to.phase == node.phase;
        let next_phase = to.phase == node.phase.next() && edge == Edge::Proceed;
        if !same_phase && !next_phase {
            return Err(illegal(
                node,
                &format!("{} -> {} leaves phase {} illegally", edge, to.id, node.phase),
            ));
        }
        if next_phase && to.id != self.first_of(to.phase) {
            return Err(illegal(node, &format!("phase {} must be entered at its first node", to.phase)));
        }
        Ok(())
    }

    fn first_of(&self, phase: Phase) -> &str {
        self.nodes
            .iter()
            .find(|n| n.phase == phase)
            .map(|n| n.id.as_str())
            .unwrap_or(DONE)
    }

    /// Moves `state` from `from` to `target`, updating phase and iteration counters.
    pub fn apply_transition(
        &self,
        from: &NodeSpec,
        target: &str,
        state: &mut ResearchState,
    ) -> Transition {
        if target == DONE {
            state.phase = Phase::Done;
            state.phase_iteration = 0;
            state.current_node_id = DONE.to_string();
            state.status = RunStatus::Done;
            return Transition::Done;
        }
        state.current_node_id = target.to_string();
        let (from_pos, to_pos) = match (self.index.get(&from.id), self.index.get(target)) {
            (Some(&f), Some(&t)) => (f, t),
            _ => return Transition::Advance,
        };
        let to_phase = self.nodes[to_pos].phase;
        if to_phase != state.phase {
            state.phase = to_phase;
            state.phase_iteration = 0;
            Transition::NextPhase
        } else if to_pos <= from_pos {
            state.phase_iteration += 1;
            Transition::LoopBack
        } else {
            Transition::Advance
        }
    }
}

fn illegal(node: &NodeSpec, reason: &str) -> TableError {
    TableError::IllegalTransition {
        node: node.id.clone(),
        reason: reason.to_string(),
    }
}
