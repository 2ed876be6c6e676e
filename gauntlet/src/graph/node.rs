//! Node declarations: what a node runs, which phase it belongs to, and where its edges go.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gate::{Edge, GateId};
use crate::state::Phase;

/// Virtual node id recorded on the initial checkpoint.
pub const START: &str = "__start__";

/// Edge target that ends the run.
pub const DONE: &str = "__done__";

/// What a node does when executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Invokes one capability.
    Capability(String),
    /// Invokes capabilities concurrently against one snapshot; merged in declared order.
    FanOut(Vec<String>),
    /// Suspends the run until an external resume.
    HumanCheckpoint { prompt: String },
}

impl NodeKind {
    /// Capability ids invoked by this node, in merge order.
    pub fn capabilities(&self) -> &[String] {
        match self {
            NodeKind::Capability(id) => std::slice::from_ref(id),
            NodeKind::FanOut(ids) => ids,
            NodeKind::HumanCheckpoint { .. } => &[],
        }
    }
}

/// One node of the research graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub phase: Phase,
    pub kind: NodeKind,
    /// At most one gate; ungated nodes have a single `Proceed` edge.
    pub gate: Option<GateId>,
    /// Edge label -> target node id (or [`DONE`]).
    pub edges: BTreeMap<Edge, String>,
}

impl NodeSpec {
    fn new(id: impl Into<String>, phase: Phase, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            phase,
            kind,
            gate: None,
            edges: BTreeMap::new(),
        }
    }

    pub fn capability(id: impl Into<String>, phase: Phase, capability: impl Into<String>) -> Self {
        Self::new(id, phase, NodeKind::Capability(capability.into()))
    }

    pub fn fan_out<I, C>(id: impl Into<String>, phase: Phase, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self::new(
            id,
            phase,
            NodeKind::FanOut(capabilities.into_iter().map(Into::into).collect()),
        )
    }

    pub fn human(id: impl Into<String>, phase: Phase, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            phase,
            NodeKind::HumanCheckpoint {
                prompt: prompt.into(),
            },
        )
    }

    pub fn with_gate(mut self, gate: GateId) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn edge(mut self, edge: Edge, target: impl Into<String>) -> Self {
        self.edges.insert(edge, target.into());
        self
    }

    /// Shorthand for the `Proceed` edge.
    pub fn then(self, target: impl Into<String>) -> Self {
        self.edge(Edge::Proceed, target)
    }

    /// Target for `edge`; `ForceAdvance` follows `Proceed`.
    pub fn target(&self, edge: Edge) -> Option<&str> {
        let key = match edge {
            Edge::ForceAdvance => Edge::Proceed,
            other => other,
        };
        self.edges.get(&key).map(String::as_str)
    }

    pub fn is_human(&self) -> bool {
        matches!(self.kind, NodeKind::HumanCheckpoint { .. })
    }
}
