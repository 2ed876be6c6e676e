//! Fan-out / fan-in execution of a node's capabilities.
//!
//! All branches run as tasks against one shared, read-only snapshot. Results come back in
//! the node's declared capability order, never completion order, so the merge that follows
//! does not depend on scheduling.
//!
//! Per branch: `Transient` errors (including invocation timeouts) are retried with backoff;
//! `Invalid` or exhausted `Transient` errors degrade only that branch; a `Fatal` error aborts
//! every sibling and fails the node. A run-level cancel aborts in-flight branches, waiting at
//! most the grace period for them to stop.

mod retry;

pub use retry::RetryPolicy;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityError, CapabilityRegistry};
use crate::config::OrchestratorConfig;
use crate::state::{ResearchStateView, StateDelta};

/// What one branch contributed.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
    Completed {
        capability: String,
        delta: StateDelta,
        attempts: usize,
    },
    /// Contributes an empty delta; the error surfaces as a warning.
    Degraded {
        capability: String,
        error: CapabilityError,
        attempts: usize,
    },
}

impl BranchOutcome {
    pub fn capability(&self) -> &str {
        match self {
            BranchOutcome::Completed { capability, .. }
            | BranchOutcome::Degraded { capability, .. } => capability,
        }
    }

    /// The delta to merge (empty for degraded branches).
    pub fn delta(&self) -> StateDelta {
        match self {
            BranchOutcome::Completed { delta, .. } => delta.clone(),
            BranchOutcome::Degraded { .. } => StateDelta::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, BranchOutcome::Degraded { .. })
    }
}

/// Node-level failure of a fan-out.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FanOutError {
    #[error("capability {capability} failed fatally: {message}")]
    Fatal { capability: String, message: String },
    #[error("fan-out cancelled")]
    Cancelled,
}

/// Runs capability branches with retry, timeout and cancellation.
#[derive(Debug, Clone)]
pub struct Coordinator {
    retry: RetryPolicy,
    timeout: Duration,
    grace: Duration,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl Coordinator {
    pub fn new(retry: RetryPolicy, timeout: Duration, grace: Duration) -> Self {
        Self {
            retry,
            timeout,
            grace,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.retry_policy(),
            config.capability_timeout(),
            config.cancel_grace(),
        )
    }

    /// Invokes `ids` concurrently against `view`; outcomes are returned in `ids` order.
    pub async fn invoke_all(
        &self,
        registry: &CapabilityRegistry,
        ids: &[String],
        view: &ResearchStateView,
        cancel: &CancellationToken,
    ) -> Result<Vec<BranchOutcome>, FanOutError> {
        let mut set = JoinSet::new();
        for (index, id) in ids.iter().enumerate() {
            let capability = registry.get(id).ok_or_else(|| FanOutError::Fatal {
                capability: id.clone(),
                message: "capability not registered".into(),
            })?;
            let view = view.clone();
            let retry = self.retry.clone();
            let timeout = self.timeout;
            let id = id.clone();
            set.spawn(async move {
                let outcome = AssertUnwindSafe(run_branch(capability, view, retry, timeout))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(capability = %id, "capability panicked");
                        Ok(BranchOutcome::Degraded {
                            capability: id,
                            error: CapabilityError::Invalid("capability panicked".into()),
                            attempts: 1,
                        })
                    });
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<BranchOutcome>> = (0..ids.len()).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(branches = ids.len(), "cancelling in-flight branches");
                    self.abort(&mut set).await;
                    return Err(FanOutError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((index, Ok(outcome)))) => slots[index] = Some(outcome),
                    Some(Ok((index, Err(message)))) => {
                        self.abort(&mut set).await;
                        return Err(FanOutError::Fatal {
                            capability: ids[index].clone(),
                            message,
                        });
                    }
                    Some(Err(join_error)) => {
                        self.abort(&mut set).await;
                        return Err(FanOutError::Fatal {
                            capability: "<branch>".into(),
                            message: join_error.to_string(),
                        });
                    }
                },
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Aborts remaining branches and waits up to the grace period for them to unwind.
    async fn abort<T: 'static>(&self, set: &mut JoinSet<T>) {
        set.abort_all();
        let drained = tokio::time::timeout(self.grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(grace = ?self.grace, "branches still running after grace period");
        }
    }
}

/// One branch with retries. `Err` carries a fatal message.
async fn run_branch(
    capability: Arc<dyn Capability>,
    view: ResearchStateView,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<BranchOutcome, String> {
    let id = capability.id().to_string();
    let mut retries = 0;
    loop {
        let result = match tokio::time::timeout(timeout, capability.invoke(&view)).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Transient(format!(
                "no answer within {:?}",
                timeout
            ))),
        };
        match result {
            Ok(delta) => {
                return Ok(BranchOutcome::Completed {
                    capability: id,
                    delta,
                    attempts: retries + 1,
                })
            }
            Err(CapabilityError::Fatal(message)) => return Err(message),
            Err(error) if error.is_retryable() && retry.should_retry(retries) => {
                let delay = retry.delay(retries);
                tracing::debug!(capability = %id, retry = retries + 1, ?delay, %error, "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                retries += 1;
            }
            Err(error) => {
                tracing::warn!(capability = %id, attempts = retries + 1, %error, "branch degraded");
                return Ok(BranchOutcome::Degraded {
                    capability: id,
                    error,
                    attempts: retries + 1,
                });
            }
        }
    }
}
