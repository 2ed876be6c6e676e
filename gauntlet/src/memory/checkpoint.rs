//! Checkpoint record and the `Checkpointer` persistence trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::ResearchState;

/// Error type for checkpoint persistence. Any of these is fatal for the run: continuing
/// without a durable checkpoint would break resumability.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckpointError {
    #[error("run_id required")]
    RunIdRequired,
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("run {run_id}: sequence {attempted} does not follow {latest}")]
    NonMonotonic {
        run_id: String,
        latest: u64,
        attempted: u64,
    },
}

/// One entry of a run's append-only checkpoint log.
///
/// `node_id` is the node whose effects the state includes (or a marker such as
/// `__start__`, `__pause__`, `__error__`); `state.current_node_id` is where execution resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub sequence_number: u64,
    pub node_id: String,
    pub state: ResearchState,
    /// RFC 3339 wall-clock time of the write. Not part of the state.
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(state: ResearchState, sequence_number: u64, node_id: impl Into<String>) -> Self {
        Self {
            run_id: state.run_id.clone(),
            sequence_number,
            node_id: node_id.into(),
            state,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Durable, per-run ordered checkpoint log.
///
/// Implementations must reject a `put` whose sequence number is not greater than the
/// run's latest, so the log stays totally ordered.
///
/// **Interaction**: Written only by [`GraphEngine`](crate::graph::GraphEngine); read by
/// the engine on every step and by [`Orchestrator`](crate::run::Orchestrator) queries.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Highest-sequence checkpoint of the run.
    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Whole log of the run, ascending by sequence number.
    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Run ids with at least one checkpoint, sorted.
    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError>;
}
