//! Research state: the value-semantics snapshot that flows through the node table.
//!
//! [`ResearchState`] is owned by the run and mutated only by the graph engine.
//! Capabilities see it through a read-only [`ResearchStateView`] and answer with a
//! [`StateDelta`]; the engine merges deltas and writes a checkpoint per node.

mod delta;
mod research_state;

pub use delta::{Feedback, StateDelta};
pub use research_state::{
    Citation, Gap, GapKind, KnowledgeFragment, Metrics, Outline, Phase, Question, ResearchState,
    ReviewPoints, RunStatus, Section, Source, SourceType, VerificationStatus,
};

use std::ops::Deref;
use std::sync::Arc;

/// Read-only, cheaply clonable projection of a [`ResearchState`].
///
/// Fan-out branches share one view; none of them can reach the checkpoint log or
/// mutate the run's state.
#[derive(Debug, Clone)]
pub struct ResearchStateView(Arc<ResearchState>);

impl ResearchStateView {
    /// Snapshots `state` for capability invocation.
    pub fn new(state: ResearchState) -> Self {
        Self(Arc::new(state))
    }
}

impl Deref for ResearchStateView {
    type Target = ResearchState;

    fn deref(&self) -> &ResearchState {
        &self.0
    }
}

impl From<&ResearchState> for ResearchStateView {
    fn from(state: &ResearchState) -> Self {
        Self::new(state.clone())
    }
}
