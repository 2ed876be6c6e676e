//! End-to-end research runs over the default graph with a deterministic research team.

#[path = "../init_logging.rs"]
mod init_logging;

mod common;
mod full_run;
mod gates;
mod resume;
