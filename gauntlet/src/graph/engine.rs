//! Graph engine: drives one run through the node table, one checkpoint per node.
//!
//! Each step loads the latest checkpoint, runs the current node's capabilities through the
//! [`Coordinator`], merges the deltas, evaluates the node's gate, moves `current_node_id`
//! and `phase` to the chosen target and writes the result as the next checkpoint. The merge
//! and the advance are persisted together, so resuming from any checkpoint neither skips
//! a node's effects nor applies them twice.
//!
//! The engine is the single writer of a run's log. Pause, cancel and resume-with-feedback
//! are the only ways anything else reaches the state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::coordinator::{BranchOutcome, Coordinator, FanOutError};
use crate::error::OrchestratorError;
use crate::gate::{self, Edge, GateError, GateInput};
use crate::memory::{Checkpoint, Checkpointer};
use crate::merge::{merge_gap, warning_gap, Merger};
use crate::state::{
    Feedback, Phase, ResearchState, ResearchStateView, ReviewPoints, RunStatus, StateDelta,
};
use crate::stream::{EventSink, RunEvent};

use super::logging::{
    log_checkpoint, log_gate_decision, log_node_complete, log_node_start, log_run_error,
    log_run_resume, log_run_start, log_run_stopped,
};
use super::node::{NodeKind, NodeSpec, START};
use super::table::NodeTable;

/// Checkpoint node id for an external pause.
pub const PAUSE_MARKER: &str = "__pause__";
/// Checkpoint node id for a resume that did not execute a node.
pub const RESUME_MARKER: &str = "__resume__";
/// Checkpoint node id for a cancelled run.
pub const CANCEL_MARKER: &str = "__cancel__";
/// Checkpoint node id for an errored run.
pub const ERROR_MARKER: &str = "__error__";

/// Capability id recorded for merge warnings caused by human feedback.
const FEEDBACK_SOURCE: &str = "human_feedback";

/// Pause flag and cancel token shared between a run's driver and its controller.
#[derive(Debug, Clone)]
pub struct RunControl {
    pause: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            pause: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Requests a pause at the next node boundary.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Aborts in-flight capabilities and stops the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Time spent in the current phase; restarts on phase change and on resume.
#[derive(Debug)]
struct PhaseClock {
    phase: Phase,
    started: Instant,
}

impl PhaseClock {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            started: Instant::now(),
        }
    }

    fn observe(&mut self, phase: Phase) {
        if phase != self.phase {
            *self = Self::new(phase);
        }
    }

    fn expired(&self, limit: Duration) -> bool {
        self.started.elapsed() >= limit
    }
}

/// Executes runs over a validated node table.
///
/// **Interaction**: Owned by [`Orchestrator`](crate::run::Orchestrator) behind an `Arc`;
/// all state transitions of every run go through it.
pub struct GraphEngine {
    table: NodeTable,
    registry: CapabilityRegistry,
    checkpointer: Arc<dyn Checkpointer>,
    merger: Merger,
    coordinator: Coordinator,
    config: OrchestratorConfig,
    events: EventSink,
    /// Phase clocks of runs driven through [`GraphEngine::step`], kept between calls.
    step_clocks: DashMap<String, PhaseClock>,
}

impl std::fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphEngine")
            .field("nodes", &self.table.nodes().len())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl GraphEngine {
    /// Validates thresholds and that every node's capabilities are registered.
    pub fn new(
        table: NodeTable,
        registry: CapabilityRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        config.gates.validate()?;
        if !config.completeness_tolerance.is_finite() || config.completeness_tolerance < 0.0 {
            return Err(GateError::InvalidThreshold {
                gate: gate::GateId::GapRecursion,
                name: "completeness_tolerance",
                value: config.completeness_tolerance,
            }
            .into());
        }
        table.check_capabilities(&registry)?;
        Ok(Self {
            merger: Merger::with_source_key(config.dedup.source_key),
            coordinator: Coordinator::from_config(&config),
            table,
            registry,
            checkpointer,
            config,
            events: EventSink::noop(),
            step_clocks: DashMap::new(),
        })
    }

    pub fn with_merger(mut self, merger: Merger) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Coordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Writes checkpoint 0 for a new run positioned at the entry node.
    pub async fn initialize(
        &self,
        run_id: &str,
        topic: &str,
        constraints: BTreeMap<String, String>,
    ) -> Result<ResearchState, OrchestratorError> {
        let mut state =
            ResearchState::new(run_id, topic, constraints, self.table.entry().id.clone());
        state.reviews = self.config.review_points();
        log_run_start(run_id, topic);
        self.events.emit(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
        });
        let checkpoint = self.persist(Checkpoint::new(state, 0, START)).await?;
        Ok(checkpoint.state)
    }

    async fn load(&self, run_id: &str) -> Result<Checkpoint, OrchestratorError> {
        self.checkpointer
            .latest(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    /// Rejects runs started with other review nodes than this engine's graph has.
    fn check_reviews(&self, state: &ResearchState) -> Result<(), OrchestratorError> {
        let engine: ReviewPoints = self.config.review_points();
        if state.reviews != engine {
            return Err(OrchestratorError::ReviewMismatch {
                run_id: state.run_id.clone(),
                stored: state.reviews,
                engine,
            });
        }
        Ok(())
    }

    /// Latest persisted state of a run.
    pub async fn state(&self, run_id: &str) -> Result<ResearchState, OrchestratorError> {
        Ok(self.load(run_id).await?.state)
    }

    /// Executes exactly one node of a running run and returns the new state.
    ///
    /// The phase clock carries over between `step` calls on the same engine, so phase
    /// timeouts apply to stepped runs too.
    pub async fn step(&self, run_id: &str) -> Result<ResearchState, OrchestratorError> {
        let latest = self.load(run_id).await?;
        if latest.state.status != RunStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                operation: "step",
                status: latest.state.status.clone(),
            });
        }
        self.check_reviews(&latest.state)?;
        let mut clock = self.take_clock(run_id, latest.state.phase);
        let control = RunControl::new();
        match self.execute(&latest, &control, &mut clock).await {
            Ok(next) => {
                if next.state.status == RunStatus::Running {
                    self.step_clocks.insert(run_id.to_string(), clock);
                }
                Ok(next.state)
            }
            Err(error) => Err(self.fail(&latest, error).await),
        }
    }

    /// The clock left by earlier `step` calls, or a new one for `phase`.
    fn take_clock(&self, run_id: &str, phase: Phase) -> PhaseClock {
        self.step_clocks
            .remove(run_id)
            .map(|(_, clock)| clock)
            .unwrap_or_else(|| PhaseClock::new(phase))
    }

    /// Drives the run from its latest checkpoint until it finishes, pauses, errors or is
    /// cancelled. Returns the last persisted state.
    pub async fn run(
        &self,
        run_id: &str,
        control: &RunControl,
    ) -> Result<ResearchState, OrchestratorError> {
        let mut latest = self.load(run_id).await?;
        if latest.state.status == RunStatus::Running {
            self.check_reviews(&latest.state)?;
        }
        if latest.sequence_number > 0 {
            log_run_resume(run_id, &latest.state.current_node_id, latest.sequence_number);
        }
        let mut clock = self.take_clock(run_id, latest.state.phase);

        while latest.state.status == RunStatus::Running {
            if control.is_cancelled() {
                latest = self.mark(&latest, RunStatus::Cancelled, CANCEL_MARKER).await?;
                break;
            }
            if control.pause_requested() {
                latest = self.mark(&latest, RunStatus::Paused, PAUSE_MARKER).await?;
                break;
            }
            if latest.state.step >= self.config.max_steps {
                let error = OrchestratorError::StepLimitExceeded {
                    limit: self.config.max_steps,
                };
                return Err(self.fail(&latest, error).await);
            }
            match self.execute(&latest, control, &mut clock).await {
                Ok(next) => latest = next,
                Err(OrchestratorError::Cancelled) => {
                    latest = self.mark(&latest, RunStatus::Cancelled, CANCEL_MARKER).await?;
                    break;
                }
                Err(error) => return Err(self.fail(&latest, error).await),
            }
        }

        let state = latest.state;
        log_run_stopped(run_id, &state.status);
        if state.status == RunStatus::Paused {
            self.events.emit(RunEvent::Paused {
                run_id: run_id.to_string(),
                prompt: state.pending_human_input.clone(),
            });
        } else {
            self.events.emit(RunEvent::Finished {
                run_id: run_id.to_string(),
                status: state.status.clone(),
            });
        }
        Ok(state)
    }

    /// Makes a stopped run runnable again, merging `feedback` first.
    ///
    /// A run paused by a human checkpoint continues past it. An errored or cancelled run
    /// restarts at the node that did not complete. A run that is still `Running` (its driver
    /// died) continues from its latest checkpoint. `Done` runs cannot be resumed.
    pub async fn prepare_resume(
        &self,
        run_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<ResearchState, OrchestratorError> {
        let latest = self.load(run_id).await?;
        if latest.state.status == RunStatus::Done {
            return Err(OrchestratorError::InvalidTransition {
                operation: "resume",
                status: RunStatus::Done,
            });
        }
        self.check_reviews(&latest.state)?;
        self.step_clocks.remove(run_id);
        if latest.state.status == RunStatus::Running && feedback.is_none() {
            return Ok(latest.state);
        }

        let mut next = latest.state.clone();
        if let Some(feedback) = feedback {
            let delta: StateDelta = feedback.into_delta();
            let node_id = next.current_node_id.clone();
            for warning in self.merger.merge(&mut next, FEEDBACK_SOURCE, &delta) {
                merge_gap(&mut next, warning.to_gap(&node_id));
            }
        }
        next.paused = false;
        next.pending_human_input = None;
        next.status = RunStatus::Running;

        // Only a pause written by the human node itself counts as answered; an external
        // pause that landed in front of it leaves the node to run and show its prompt.
        let mut marker = RESUME_MARKER.to_string();
        if latest.state.status == RunStatus::Paused {
            if let Some(node) = self.table.get(&latest.state.current_node_id) {
                if node.is_human() && latest.node_id == node.id {
                    let target = node
                        .target(Edge::Proceed)
                        .ok_or_else(|| unrouted(node, Edge::Proceed))?;
                    self.table.apply_transition(node, target, &mut next);
                    next.step += 1;
                    marker = node.id.clone();
                }
            }
        }

        let checkpoint = Checkpoint::new(next, latest.sequence_number + 1, marker);
        let checkpoint = self.persist(checkpoint).await?;
        Ok(checkpoint.state)
    }

    /// Cancels a run that has no active driver by appending a `Cancelled` checkpoint.
    pub async fn cancel_idle(&self, run_id: &str) -> Result<ResearchState, OrchestratorError> {
        let latest = self.load(run_id).await?;
        if latest.state.status == RunStatus::Done || latest.state.status == RunStatus::Cancelled {
            return Ok(latest.state);
        }
        let checkpoint = self.mark(&latest, RunStatus::Cancelled, CANCEL_MARKER).await?;
        self.events.emit(RunEvent::Finished {
            run_id: run_id.to_string(),
            status: RunStatus::Cancelled,
        });
        Ok(checkpoint.state)
    }

    /// Runs the current node and persists the merged, advanced state.
    async fn execute(
        &self,
        latest: &Checkpoint,
        control: &RunControl,
        clock: &mut PhaseClock,
    ) -> Result<Checkpoint, OrchestratorError> {
        let state = &latest.state;
        let run_id = state.run_id.as_str();
        let node = self
            .table
            .get(&state.current_node_id)
            .ok_or_else(|| OrchestratorError::NodeFailed {
                node: state.current_node_id.clone(),
                message: "not in node table".into(),
            })?;
        clock.observe(state.phase);
        log_node_start(run_id, &node.id, state.phase, state.phase_iteration);
        self.events.emit(RunEvent::NodeStart {
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            phase: state.phase,
            step: state.step,
        });

        let mut next = state.clone();

        if let NodeKind::HumanCheckpoint { prompt } = &node.kind {
            next.paused = true;
            next.pending_human_input = Some(prompt.clone());
            next.status = RunStatus::Paused;
            return self
                .persist(Checkpoint::new(next, latest.sequence_number + 1, node.id.clone()))
                .await;
        }

        let view = ResearchStateView::from(state);
        let outcomes = self
            .coordinator
            .invoke_all(&self.registry, node.kind.capabilities(), &view, control.cancel_token())
            .await
            .map_err(|e| match e {
                FanOutError::Cancelled => OrchestratorError::Cancelled,
                FanOutError::Fatal {
                    capability,
                    message,
                } => OrchestratorError::NodeFailed {
                    node: node.id.clone(),
                    message: format!("{}: {}", capability, message),
                },
            })?;

        let deltas: Vec<(String, StateDelta)> = outcomes
            .iter()
            .map(|o| (o.capability().to_string(), o.delta()))
            .collect();
        let mut warnings: Vec<String> = outcomes
            .iter()
            .filter_map(|o| match o {
                BranchOutcome::Degraded {
                    capability,
                    error,
                    attempts,
                } => Some(format!(
                    "{} degraded after {} attempt(s): {}",
                    capability, attempts, error
                )),
                BranchOutcome::Completed { .. } => None,
            })
            .collect();
        warnings.extend(
            self.merger
                .merge_all(&mut next, &deltas)
                .iter()
                .map(ToString::to_string),
        );

        let edge = match node.gate {
            Some(gate_id) => {
                let decision = gate::evaluate(
                    gate_id,
                    &GateInput {
                        state: &next,
                        node_id: &node.id,
                        iteration_cap: self.config.iteration_cap,
                        completeness_tolerance: self.config.completeness_tolerance,
                        phase_timed_out: clock.expired(self.config.phase_timeout()),
                    },
                    &self.config.gates,
                );
                next.gate_history
                    .insert(node.id.clone(), next.metrics.completeness);
                if let Some(reason) = decision.forced {
                    next.degraded = true;
                    warnings.push(format!("{} forced advancement ({:?})", gate_id, reason));
                }
                log_gate_decision(run_id, &node.id, gate_id, &decision);
                self.events.emit(RunEvent::GateDecision {
                    run_id: run_id.to_string(),
                    node_id: node.id.clone(),
                    edge: decision.edge,
                    forced: decision.forced,
                });
                decision.edge
            }
            None => Edge::Proceed,
        };

        for warning in &warnings {
            merge_gap(&mut next, warning_gap(&node.id, warning));
            self.events.emit(RunEvent::Warning {
                run_id: run_id.to_string(),
                node_id: node.id.clone(),
                message: warning.clone(),
            });
        }

        let target = node.target(edge).ok_or_else(|| unrouted(node, edge))?.to_string();
        self.table.apply_transition(node, &target, &mut next);
        next.step += 1;

        let checkpoint = self
            .persist(Checkpoint::new(next, latest.sequence_number + 1, node.id.clone()))
            .await?;
        log_node_complete(run_id, &node.id, &target);
        self.events.emit(RunEvent::NodeEnd {
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            edge,
            next: target,
        });
        Ok(checkpoint)
    }

    async fn persist(&self, checkpoint: Checkpoint) -> Result<Checkpoint, OrchestratorError> {
        self.checkpointer.put(&checkpoint).await?;
        log_checkpoint(&checkpoint.run_id, checkpoint.sequence_number, &checkpoint.node_id);
        self.events.emit(RunEvent::CheckpointWritten {
            run_id: checkpoint.run_id.clone(),
            seq: checkpoint.sequence_number,
            node_id: checkpoint.node_id.clone(),
        });
        Ok(checkpoint)
    }

    /// Appends the latest state with a new status under a marker node id.
    async fn mark(
        &self,
        latest: &Checkpoint,
        status: RunStatus,
        marker: &str,
    ) -> Result<Checkpoint, OrchestratorError> {
        let mut state = latest.state.clone();
        state.paused = status == RunStatus::Paused;
        state.status = status;
        self.persist(Checkpoint::new(state, latest.sequence_number + 1, marker))
            .await
    }

    /// Records `error` as an `Errored` checkpoint of the last good state, when the log is
    /// still writable, and hands the error back.
    async fn fail(&self, latest: &Checkpoint, error: OrchestratorError) -> OrchestratorError {
        log_run_error(&latest.run_id, &error);
        if !error.is_persistence() {
            let status = RunStatus::Errored {
                message: error.to_string(),
            };
            if let Err(write_error) = self.mark(latest, status.clone(), ERROR_MARKER).await {
                log_run_error(&latest.run_id, &write_error);
            } else {
                self.events.emit(RunEvent::Finished {
                    run_id: latest.run_id.clone(),
                    status,
                });
            }
        }
        error
    }
}

fn unrouted(node: &NodeSpec, edge: Edge) -> OrchestratorError {
    match node.gate {
        Some(gate) => GateError::Unrouted {
            node: node.id.clone(),
            gate,
            edge,
        }
        .into(),
        None => OrchestratorError::NodeFailed {
            node: node.id.clone(),
            message: format!("no {} edge", edge),
        },
    }
}
