//! Structured logging for run execution: run lifecycle, nodes, gates, checkpoints.

use crate::error::OrchestratorError;
use crate::gate::{GateDecision, GateId};
use crate::state::{Phase, RunStatus};

pub fn log_run_start(run_id: &str, topic: &str) {
    tracing::info!(run_id, topic, "Starting research run");
}

pub fn log_run_resume(run_id: &str, node_id: &str, seq: u64) {
    tracing::info!(run_id, node_id, seq, "Resuming research run");
}

pub fn log_node_start(run_id: &str, node_id: &str, phase: Phase, iteration: u32) {
    tracing::debug!(run_id, node_id, %phase, iteration, "Starting node execution");
}

pub fn log_node_complete(run_id: &str, node_id: &str, next: &str) {
    tracing::debug!(run_id, node_id, next, "Node execution complete");
}

pub fn log_gate_decision(run_id: &str, node_id: &str, gate: GateId, decision: &GateDecision) {
    match decision.forced {
        Some(reason) => tracing::warn!(
            run_id, node_id, %gate, edge = %decision.edge, ?reason,
            "Gate forced advancement"
        ),
        None => tracing::debug!(run_id, node_id, %gate, edge = %decision.edge, "Gate decision"),
    }
}

pub fn log_checkpoint(run_id: &str, seq: u64, node_id: &str) {
    tracing::debug!(run_id, seq, node_id, "Checkpoint written");
}

pub fn log_run_stopped(run_id: &str, status: &RunStatus) {
    tracing::info!(run_id, ?status, "Research run stopped");
}

pub fn log_run_error(run_id: &str, error: &OrchestratorError) {
    tracing::error!(run_id, %error, "Research run error");
}
