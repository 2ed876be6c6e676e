//! In-memory checkpointer (MemorySaver). Not persistent; for dev and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::checkpoint::{Checkpoint, CheckpointError, Checkpointer};

/// Per-run checkpoint lists, newest last.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer>` by the engine; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    by_run: Arc<RwLock<BTreeMap<String, Vec<Checkpoint>>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemorySaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if checkpoint.run_id.is_empty() {
            return Err(CheckpointError::RunIdRequired);
        }
        let mut guard = self.by_run.write().await;
        let log = guard.entry(checkpoint.run_id.clone()).or_default();
        if let Some(last) = log.last() {
            if checkpoint.sequence_number <= last.sequence_number {
                return Err(CheckpointError::NonMonotonic {
                    run_id: checkpoint.run_id.clone(),
                    latest: last.sequence_number,
                    attempted: checkpoint.sequence_number,
                });
            }
        }
        log.push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let guard = self.by_run.read().await;
        Ok(guard.get(run_id).and_then(|log| log.last().cloned()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let guard = self.by_run.read().await;
        Ok(guard.get(run_id).cloned().unwrap_or_default())
    }

    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError> {
        let guard = self.by_run.read().await;
        Ok(guard
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}
