//! Test doubles for capabilities.
//!
//! [`FnCapability`] answers from a closure over the state (deterministic, replay-safe).
//! [`ScriptedCapability`] answers from a queue of canned outcomes, one per call, and
//! counts invocations so tests can assert on retries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::state::{ResearchState, ResearchStateView, StateDelta};

use super::{Capability, CapabilityError};

type DeltaFn = dyn Fn(&ResearchState) -> Result<StateDelta, CapabilityError> + Send + Sync;

/// Capability backed by a closure `(state) -> delta`.
pub struct FnCapability {
    id: String,
    f: Box<DeltaFn>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FnCapability {
    pub fn new(
        id: impl Into<String>,
        f: impl Fn(&ResearchState) -> Result<StateDelta, CapabilityError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            f: Box::new(f),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns an empty delta.
    pub fn noop(id: impl Into<String>) -> Self {
        Self::new(id, |_| Ok(StateDelta::new()))
    }

    /// Sleeps before answering (for timeout, cancellation and ordering tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, state: &ResearchStateView) -> Result<StateDelta, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.f)(state)
    }
}

/// Capability that replays canned outcomes in order; the last one repeats once the
/// queue is drained.
pub struct ScriptedCapability {
    id: String,
    script: Mutex<VecDeque<Result<StateDelta, CapabilityError>>>,
    last: Mutex<Option<Result<StateDelta, CapabilityError>>>,
    calls: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(
        id: impl Into<String>,
        outcomes: impl IntoIterator<Item = Result<StateDelta, CapabilityError>>,
    ) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails `times` times with `error`, then succeeds with `delta` forever.
    pub fn failing_then(
        id: impl Into<String>,
        error: CapabilityError,
        times: usize,
        delta: StateDelta,
    ) -> Self {
        let outcomes = std::iter::repeat(Err(error))
            .take(times)
            .chain(std::iter::once(Ok(delta)));
        Self::new(id, outcomes)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, _state: &ResearchStateView) -> Result<StateDelta, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| CapabilityError::Fatal("script lock poisoned".into()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| CapabilityError::Fatal("script lock poisoned".into()))?;
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last.clone().unwrap_or_else(|| Ok(StateDelta::new())),
        }
    }
}
