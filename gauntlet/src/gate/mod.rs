//! Quality gates: pure functions from state metrics to one of a fixed set of edges.
//!
//! Each [`GateId`] has a closed edge set known at design time, so routing is statically
//! checkable when the node table is built. Thresholds come from configuration.
//!
//! A gate that would loop is forced onto [`Edge::ForceAdvance`] (routed like `Proceed`)
//! when the phase iteration cap is reached, when the phase ran past its time ceiling, or,
//! for gap recursion, when completeness stopped improving. Forcing marks the state degraded.

use serde::{Deserialize, Serialize};

use crate::state::ResearchState;

/// Default completeness tolerance for the diminishing-returns rule.
pub const DEFAULT_COMPLETENESS_TOLERANCE: f64 = 0.05;

/// Default loop-backs allowed per phase before a gate forces advancement.
pub const DEFAULT_ITERATION_CAP: u32 = 3;

/// Outgoing edge label chosen after a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// Normal forward edge; also the single edge of ungated nodes.
    Proceed,
    /// Source quality too low: search again.
    RetrySearch,
    /// Open coverage gaps: back to deep-dive research.
    Recurse,
    /// Draft not coherent enough: revise and critique again.
    Revise,
    /// Loop suppressed by cap, timeout or diminishing returns; follows the `Proceed` target.
    ForceAdvance,
}

impl Edge {
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::Proceed => "proceed",
            Edge::RetrySearch => "retry_search",
            Edge::Recurse => "recurse",
            Edge::Revise => "revise",
            Edge::ForceAdvance => "force_advance",
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision points of the research graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    /// After source assessment: `sourceQuality >= threshold` proceeds.
    SourceQuality,
    /// After gap analysis: open coverage gaps recurse into deep-dive.
    GapRecursion,
    /// After critique: `coherence >= threshold` proceeds.
    CritiqueQuality,
}

impl GateId {
    /// The closed set of edges this gate may return.
    pub fn edges(self) -> &'static [Edge] {
        match self {
            GateId::SourceQuality => &[Edge::Proceed, Edge::RetrySearch, Edge::ForceAdvance],
            GateId::GapRecursion => &[Edge::Proceed, Edge::Recurse, Edge::ForceAdvance],
            GateId::CritiqueQuality => &[Edge::Proceed, Edge::Revise, Edge::ForceAdvance],
        }
    }

    /// The edge that loops back within the phase.
    pub fn loop_edge(self) -> Edge {
        match self {
            GateId::SourceQuality => Edge::RetrySearch,
            GateId::GapRecursion => Edge::Recurse,
            GateId::CritiqueQuality => Edge::Revise,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateId::SourceQuality => "source_quality",
            GateId::GapRecursion => "gap_recursion",
            GateId::CritiqueQuality => "critique_quality",
        }
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Misconfigured gate thresholds or edge tables. Always fatal for the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("gate {gate}: threshold {name}={value} outside [0, 1]")]
    InvalidThreshold {
        gate: GateId,
        name: &'static str,
        value: f64,
    },
    #[error("node {node}: gate {gate} needs an edge for {edge}")]
    MissingEdge {
        node: String,
        gate: GateId,
        edge: Edge,
    },
    #[error("node {node}: edge {edge} is not produced by gate {gate}")]
    UnexpectedEdge {
        node: String,
        gate: GateId,
        edge: Edge,
    },
    #[error("gate {gate} returned {edge}, which node {node} does not route")]
    Unrouted {
        node: String,
        gate: GateId,
        edge: Edge,
    },
}

/// Metric thresholds, inclusive: a metric exactly at the threshold passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub source_quality: f64,
    pub coherence: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            source_quality: 0.7,
            coherence: 0.7,
        }
    }
}

impl GateThresholds {
    pub fn validate(&self) -> Result<(), GateError> {
        check_unit(GateId::SourceQuality, "source_quality", self.source_quality)?;
        check_unit(GateId::CritiqueQuality, "coherence", self.coherence)
    }
}

fn check_unit(gate: GateId, name: &'static str, value: f64) -> Result<(), GateError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GateError::InvalidThreshold { gate, name, value })
    }
}

/// Why a loop edge was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceReason {
    IterationCap,
    PhaseTimeout,
    DiminishingReturns,
}

/// Result of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub edge: Edge,
    pub forced: Option<ForceReason>,
}

impl GateDecision {
    /// Forced decisions mark the run degraded.
    pub fn degraded(&self) -> bool {
        self.forced.is_some()
    }
}

/// Everything a gate reads besides the thresholds.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub state: &'a ResearchState,
    /// Gated node being evaluated (key into `gate_history`).
    pub node_id: &'a str,
    pub iteration_cap: u32,
    pub completeness_tolerance: f64,
    pub phase_timed_out: bool,
}

/// `evaluate(gateId, state) -> Edge`, with the forcing rules applied.
pub fn evaluate(gate: GateId, input: &GateInput<'_>, thresholds: &GateThresholds) -> GateDecision {
    let metrics = &input.state.metrics;
    let wants_loop = match gate {
        GateId::SourceQuality => metrics.source_quality < thresholds.source_quality,
        GateId::GapRecursion => input.state.open_gaps().next().is_some(),
        GateId::CritiqueQuality => metrics.coherence < thresholds.coherence,
    };
    if !wants_loop {
        return GateDecision {
            edge: Edge::Proceed,
            forced: None,
        };
    }

    let forced = if input.phase_timed_out {
        Some(ForceReason::PhaseTimeout)
    } else if input.state.phase_iteration >= input.iteration_cap {
        Some(ForceReason::IterationCap)
    } else if gate == GateId::GapRecursion && stalled(input) {
        Some(ForceReason::DiminishingReturns)
    } else {
        None
    };

    match forced {
        Some(reason) => GateDecision {
            edge: Edge::ForceAdvance,
            forced: Some(reason),
        },
        None => GateDecision {
            edge: gate.loop_edge(),
            forced: None,
        },
    }
}

/// Completeness moved less than the tolerance since the previous evaluation of this node.
fn stalled(input: &GateInput<'_>) -> bool {
    match input.state.gate_history.get(input.node_id) {
        Some(previous) => {
            (input.state.metrics.completeness - previous).abs() < input.completeness_tolerance
        }
        None => false,
    }
}
