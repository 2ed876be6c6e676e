//! Run events for monitors.
//!
//! The engine emits a [`RunEvent`] at node start/end, gate decisions, warnings, checkpoint
//! writes, pauses and run completion. Delivery is best effort through a bounded channel:
//! [`EventSink::emit`] uses `try_send`, so a slow or absent consumer never stalls a run.
//!
//! ```rust,ignore
//! use tokio_stream::StreamExt;
//!
//! let (sink, mut events) = EventSink::channel(256);
//! let engine = engine.with_events(sink);
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::gate::{Edge, ForceReason};
use crate::state::{Phase, RunStatus};

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        topic: String,
    },
    NodeStart {
        run_id: String,
        node_id: String,
        phase: Phase,
        step: u64,
    },
    NodeEnd {
        run_id: String,
        node_id: String,
        edge: Edge,
        next: String,
    },
    GateDecision {
        run_id: String,
        node_id: String,
        edge: Edge,
        forced: Option<ForceReason>,
    },
    Warning {
        run_id: String,
        node_id: String,
        message: String,
    },
    CheckpointWritten {
        run_id: String,
        seq: u64,
        node_id: String,
    },
    Paused {
        run_id: String,
        prompt: Option<String>,
    },
    Finished {
        run_id: String,
        status: RunStatus,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::NodeStart { run_id, .. }
            | RunEvent::NodeEnd { run_id, .. }
            | RunEvent::GateDecision { run_id, .. }
            | RunEvent::Warning { run_id, .. }
            | RunEvent::CheckpointWritten { run_id, .. }
            | RunEvent::Paused { run_id, .. }
            | RunEvent::Finished { run_id, .. } => run_id,
        }
    }
}

/// Sending half; cheap to clone. The default sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventSink {
    /// Bounded channel; the stream ends once every sink clone is dropped.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }

    pub fn noop() -> Self {
        Self::default()
    }

    /// Returns `false` when the event was dropped (no consumer, or channel full).
    pub fn emit(&self, event: RunEvent) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}
