//! Checkpoint persistence: the append-only, per-run log that makes runs resumable.
//!
//! - [`Checkpointer`]: put / latest / history / list_runs.
//! - [`MemorySaver`]: in-process, for tests and embedding.
//! - [`SqliteSaver`]: durable, payload encoded by a [`Serializer`] (default [`JsonSerializer`]).

mod checkpoint;
mod memory_saver;
mod serializer;
mod sqlite_saver;

pub use checkpoint::{Checkpoint, CheckpointError, Checkpointer};
pub use memory_saver::MemorySaver;
pub use serializer::{JsonSerializer, Serializer};
pub use sqlite_saver::SqliteSaver;
