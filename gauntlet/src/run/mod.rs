//! Run control: start, pause, resume, cancel and inspect research runs.
//!
//! Each active run has one driver task executing [`GraphEngine::run`]. The orchestrator
//! keeps that task's handle and its [`RunControl`]; everything else about a run lives in
//! the checkpoint log, so a run whose driver is gone (finished, crashed, or from another
//! process) can still be inspected, resumed or cancelled.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::graph::{research_graph, GraphEngine, RunControl};
use crate::memory::{Checkpoint, Checkpointer};
use crate::state::{Feedback, ResearchState, RunStatus};
use crate::stream::EventSink;

type Driver = JoinHandle<Result<ResearchState, OrchestratorError>>;

struct RunSlot {
    control: RunControl,
    driver: Option<Driver>,
    /// Flips to `true` once the driver has written its last checkpoint.
    stopped: watch::Receiver<bool>,
}

impl RunSlot {
    fn is_active(&self) -> bool {
        !*self.stopped.borrow() && self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }
}

/// Entry point for callers: owns the engine and the live drivers.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<GraphEngine>,
    runs: Arc<DashMap<String, RunSlot>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("live_runs", &self.runs.len())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(engine: GraphEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Builds the default research graph for `config` and an engine over it.
    pub fn from_config(
        registry: CapabilityRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        config: OrchestratorConfig,
        events: EventSink,
    ) -> Result<Self, OrchestratorError> {
        let table = research_graph(&config)?;
        let engine = GraphEngine::new(table, registry, checkpointer, config)?.with_events(events);
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    /// Starts a run under a fresh id and returns the id.
    pub async fn start(
        &self,
        topic: &str,
        constraints: BTreeMap<String, String>,
    ) -> Result<String, OrchestratorError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.start_with_id(&run_id, topic, constraints).await?;
        Ok(run_id)
    }

    /// Starts a run under a caller-chosen id. Fails if the id already has checkpoints.
    pub async fn start_with_id(
        &self,
        run_id: &str,
        topic: &str,
        constraints: BTreeMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        self.engine.initialize(run_id, topic, constraints).await?;
        self.spawn_driver(run_id);
        Ok(())
    }

    fn spawn_driver(&self, run_id: &str) {
        let control = RunControl::new();
        let engine = Arc::clone(&self.engine);
        let id = run_id.to_string();
        let task_control = control.clone();
        let (stopped_tx, stopped) = watch::channel(false);
        let driver = tokio::spawn(async move {
            let result = engine.run(&id, &task_control).await;
            let _ = stopped_tx.send(true);
            result
        });
        self.runs.insert(
            run_id.to_string(),
            RunSlot {
                control,
                driver: Some(driver),
                stopped,
            },
        );
    }

    fn live_control(&self, run_id: &str) -> Option<RunControl> {
        self.runs
            .get(run_id)
            .filter(|slot| slot.is_active())
            .map(|slot| slot.control.clone())
    }

    /// Requests a pause; the run stops at the next node boundary.
    pub async fn pause(&self, run_id: &str) -> Result<(), OrchestratorError> {
        if let Some(control) = self.live_control(run_id) {
            control.pause();
            return Ok(());
        }
        let state = self.engine.state(run_id).await?;
        Err(OrchestratorError::InvalidTransition {
            operation: "pause",
            status: state.status,
        })
    }

    /// Resumes a paused, errored or cancelled run, merging `feedback` first, and starts a
    /// new driver. A pause that is still in flight is waited out.
    pub async fn resume(
        &self,
        run_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<(), OrchestratorError> {
        if let Some(control) = self.live_control(run_id) {
            if !control.pause_requested() {
                return Err(OrchestratorError::InvalidTransition {
                    operation: "resume",
                    status: RunStatus::Running,
                });
            }
            self.wait(run_id).await?;
        }
        self.engine.prepare_resume(run_id, feedback).await?;
        self.spawn_driver(run_id);
        Ok(())
    }

    /// Cancels a run. In-flight capabilities are aborted and the last merged state is
    /// checkpointed as `Cancelled`.
    pub async fn cancel(&self, run_id: &str) -> Result<(), OrchestratorError> {
        if let Some(control) = self.live_control(run_id) {
            control.cancel();
            return Ok(());
        }
        self.engine.cancel_idle(run_id).await?;
        Ok(())
    }

    /// Waits for the run's driver to stop and returns the final state. Without a live
    /// driver this is the latest checkpointed state.
    ///
    /// The driver stays registered while waiting, so pause and cancel still reach it.
    /// When several callers wait, the first to collect the driver gets its result and
    /// the others get the latest checkpointed state.
    pub async fn wait(&self, run_id: &str) -> Result<ResearchState, OrchestratorError> {
        let stopped = self.runs.get(run_id).map(|slot| slot.stopped.clone());
        if let Some(mut stopped) = stopped {
            // An error means the driver ended without signalling; its handle reports why.
            let _ = stopped.wait_for(|done| *done).await;
        }
        let driver = self
            .runs
            .get_mut(run_id)
            .and_then(|mut slot| slot.driver.take());
        match driver {
            Some(driver) => match driver.await {
                Ok(result) => result,
                Err(e) => Err(OrchestratorError::DriverPanicked(e.to_string())),
            },
            None => self.engine.state(run_id).await,
        }
    }

    pub async fn get_state(&self, run_id: &str) -> Result<ResearchState, OrchestratorError> {
        self.engine.state(run_id).await
    }

    /// All checkpoints of a run, oldest first.
    pub async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, OrchestratorError> {
        let history = self.engine.checkpointer().history(run_id).await?;
        if history.is_empty() {
            return Err(OrchestratorError::RunNotFound(run_id.to_string()));
        }
        Ok(history)
    }

    pub async fn list_runs(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.engine.checkpointer().list_runs().await?)
    }
}
