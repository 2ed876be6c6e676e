//! Orchestrator-level errors.

use thiserror::Error;

use crate::capability::CapabilityError;
use crate::config::ConfigError;
use crate::gate::GateError;
use crate::graph::TableError;
use crate::memory::CheckpointError;
use crate::state::{ReviewPoints, RunStatus};

/// Errors surfaced by the engine and run control.
///
/// Everything except `Cancelled` leaves the run `Errored` (when it can still be
/// checkpointed); `Persistence` means the log itself could not be written.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("capability: {0}")]
    Capability(#[from] CapabilityError),
    #[error("gate: {0}")]
    Gate(#[from] GateError),
    #[error("node table: {0}")]
    Table(#[from] TableError),
    #[error("persistence: {0}")]
    Persistence(#[from] CheckpointError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },
    #[error("run exceeded {limit} steps")]
    StepLimitExceeded { limit: u64 },
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("{operation} not allowed while run is {status:?}")]
    InvalidTransition {
        operation: &'static str,
        status: RunStatus,
    },
    #[error("run {run_id} was started with {stored:?} but this engine's graph has {engine:?}")]
    ReviewMismatch {
        run_id: String,
        stored: ReviewPoints,
        engine: ReviewPoints,
    },
    #[error("run cancelled")]
    Cancelled,
    #[error("run driver panicked: {0}")]
    DriverPanicked(String),
}

impl OrchestratorError {
    /// Persistence failures cannot be recorded in the log they failed to write.
    pub fn is_persistence(&self) -> bool {
        matches!(self, OrchestratorError::Persistence(_))
    }
}
