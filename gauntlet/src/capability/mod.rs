//! Capability interface: the uniform contract every pluggable research agent satisfies.
//!
//! A capability receives a read-only [`ResearchStateView`] and returns a [`StateDelta`].
//! It never mutates shared state, so any number of capabilities can run concurrently
//! against the same snapshot. Capabilities are looked up by id in a [`CapabilityRegistry`].

mod mock;

pub use mock::{FnCapability, ScriptedCapability};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{ResearchStateView, StateDelta};

/// Capability ids used by the default research graph.
pub mod ids {
    pub const DECOMPOSE_TOPIC: &str = "decompose_topic";
    pub const SEARCH_SOURCES: &str = "search_sources";
    pub const SCORE_SOURCES: &str = "score_sources";
    pub const ACADEMIC_RESEARCH: &str = "academic_research";
    pub const EXPERT_RESEARCH: &str = "expert_research";
    pub const ANALYZE_GAPS: &str = "analyze_gaps";
    pub const BUILD_OUTLINE: &str = "build_outline";
    pub const WRITE_SECTIONS: &str = "write_sections";
    pub const COMPILE_CITATIONS: &str = "compile_citations";
    pub const CRITIQUE_DRAFT: &str = "critique_draft";
    pub const REVISE_DRAFT: &str = "revise_draft";

    /// Every capability the default graph invokes.
    pub const ALL: [&str; 11] = [
        DECOMPOSE_TOPIC,
        SEARCH_SOURCES,
        SCORE_SOURCES,
        ACADEMIC_RESEARCH,
        EXPERT_RESEARCH,
        ANALYZE_GAPS,
        BUILD_OUTLINE,
        WRITE_SECTIONS,
        COMPILE_CITATIONS,
        CRITIQUE_DRAFT,
        REVISE_DRAFT,
    ];
}

/// Failure reported by a capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Network / rate-limit / timeout; retried by the coordinator.
    #[error("transient: {0}")]
    Transient(String),
    /// Malformed input; the branch contributes an empty delta and a warning.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Capability unusable for this run; aborts the node.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CapabilityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CapabilityError::Fatal(_))
    }
}

/// One pluggable research/writing agent.
///
/// **Interaction**: Registered in [`CapabilityRegistry`]; invoked by the
/// [`Coordinator`](crate::coordinator::Coordinator) for single and fan-out nodes.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Capability id (e.g. `"search_sources"`). Unique within a registry.
    fn id(&self) -> &str;

    /// Reads the snapshot and returns the changes it proposes.
    async fn invoke(&self, state: &ResearchStateView) -> Result<StateDelta, CapabilityError>;
}

/// Capabilities keyed by id.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    by_id: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the capability's own id; replaces any previous entry.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        self.by_id.insert(capability.id().to_string(), capability);
        self
    }

    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    /// `invoke(capabilityId, state)`; an unknown id is reported as `Fatal`.
    pub async fn invoke(
        &self,
        id: &str,
        state: &ResearchStateView,
    ) -> Result<StateDelta, CapabilityError> {
        match self.by_id.get(id) {
            Some(capability) => capability.invoke(state).await,
            None => Err(CapabilityError::Fatal(format!(
                "capability not registered: {}",
                id
            ))),
        }
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("ids", &self.by_id.keys().collect::<Vec<_>>())
            .finish()
    }
}
