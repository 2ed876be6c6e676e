//! # Gauntlet
//!
//! Resumable research orchestration. A topic goes through four phases (exploration,
//! deep dive, synthesis, critique) as a graph of nodes. Each node runs one or more
//! pluggable capabilities against a read-only snapshot of the shared research state and
//! merges what they return. Quality gates between phases either advance or loop back, and
//! every node execution is checkpointed so a run can be paused, resumed after a crash, or
//! cancelled without losing merged work.
//!
//! ## Design principles
//!
//! - **Capabilities return deltas**: a [`Capability`] gets a [`ResearchStateView`] and
//!   returns a [`StateDelta`]; only the [`Merger`] writes to [`ResearchState`].
//! - **Deterministic merge**: fan-out results are merged in declared capability order, with
//!   identity-based dedup ([`IdentityPolicy`]), so scheduling never changes the outcome.
//! - **Gates always terminate**: [`gate::evaluate`] forces advancement after the iteration
//!   cap, a phase timeout or a completeness plateau, and marks the run degraded.
//! - **Checkpoint per node**: the merged state, already advanced to the next node, is one
//!   append to the [`Checkpointer`] log.
//!
//! ## Main modules
//!
//! - [`capability`]: [`Capability`] trait, [`CapabilityRegistry`], test capabilities.
//! - [`coordinator`]: fan-out with retry ([`RetryPolicy`]), timeout and cancellation.
//! - [`merge`]: [`Merger`], dedup identity and metrics policies.
//! - [`gate`]: gate decisions ([`GateId`], [`Edge`], [`GateThresholds`]).
//! - [`graph`]: [`NodeTable`], [`GraphEngine`], [`research_graph`], DOT/text export.
//! - [`memory`]: [`Checkpointer`], [`MemorySaver`], [`SqliteSaver`].
//! - [`run`]: [`Orchestrator`] (start / pause / resume / cancel / wait / inspect).
//! - [`stream`]: [`RunEvent`] and [`EventSink`] for monitors.
//! - [`config`]: [`OrchestratorConfig`] from defaults, XDG `config.toml`, `.env` and env vars.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use gauntlet::{
//!     capability::ids, CapabilityRegistry, EventSink, FnCapability, MemorySaver, Orchestrator,
//!     OrchestratorConfig,
//! };
//!
//! # async fn demo() -> Result<(), gauntlet::OrchestratorError> {
//! let registry = ids::ALL
//!     .iter()
//!     .fold(CapabilityRegistry::new(), |r, id| r.with(Arc::new(FnCapability::noop(*id))));
//! let orch = Orchestrator::from_config(
//!     registry,
//!     Arc::new(MemorySaver::new()),
//!     OrchestratorConfig::default(),
//!     EventSink::noop(),
//! )?;
//! let run_id = orch.start("urban heat islands", BTreeMap::new()).await?;
//! let state = orch.wait(&run_id).await?;
//! println!("{:?} after {} steps", state.status, state.step);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod graph;
pub mod memory;
pub mod merge;
pub mod run;
pub mod state;
pub mod stream;

pub use capability::{
    Capability, CapabilityError, CapabilityRegistry, FnCapability, ScriptedCapability,
};
pub use config::{ConfigError, DedupConfig, OrchestratorConfig, APP_NAME};
pub use coordinator::{BranchOutcome, Coordinator, FanOutError, RetryPolicy};
pub use error::OrchestratorError;
pub use gate::{Edge, ForceReason, GateDecision, GateError, GateId, GateThresholds};
pub use graph::{
    generate_dot, generate_text, research_graph, GraphEngine, NodeKind, NodeSpec, NodeTable,
    RunControl, TableError, Transition, DONE, START,
};
pub use memory::{
    Checkpoint, CheckpointError, Checkpointer, JsonSerializer, MemorySaver, Serializer,
    SqliteSaver,
};
pub use merge::{
    DefaultIdentity, DefaultMetrics, IdentityPolicy, MergeWarning, Merger, MetricsPolicy, SourceKey,
};
pub use run::Orchestrator;
pub use state::{
    Citation, Feedback, Gap, GapKind, KnowledgeFragment, Metrics, Outline, Phase, Question,
    ResearchState, ResearchStateView, ReviewPoints, RunStatus, Section, Source, SourceType,
    StateDelta, VerificationStatus,
};
pub use stream::{EventSink, RunEvent};
