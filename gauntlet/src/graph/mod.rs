//! Phase graph: node table, transitions, and the engine that executes it.
//!
//! # Main types
//!
//! - [`NodeSpec`] / [`NodeKind`]: one node, the capabilities it runs, its gate and edges.
//! - [`NodeTable`]: validated, phase-ordered table; [`NodeTable::apply_transition`] moves state.
//! - [`GraphEngine`]: step loop with one checkpoint per node; [`RunControl`] pauses or cancels it.
//! - [`research_graph`]: the default exploration → deep dive → synthesis → critique table.
//!
//! # Export
//!
//! [`generate_dot`] and [`generate_text`] render a table for inspection.

mod engine;
mod logging;
mod node;
mod research;
mod table;
mod visualization;

pub use engine::{
    GraphEngine, RunControl, CANCEL_MARKER, ERROR_MARKER, PAUSE_MARKER, RESUME_MARKER,
};
pub use node::{NodeKind, NodeSpec, DONE, START};
pub use research::{nodes, research_graph};
pub use table::{NodeTable, TableError, Transition};
pub use visualization::{generate_dot, generate_text};
