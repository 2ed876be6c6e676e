//! Subscriber setup for binaries.
//!
//! - **RUST_LOG**: filter, default `info`.
//! - **GAUNTLET_LOG_DIR**: when set, logs also go to a daily-rotated file in that directory
//!   (plain text, no ANSI). Stdout stays clean for command output; console logs go to stderr.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the non-blocking file writer alive; drop it at process exit to flush.
pub struct LogGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber. Safe to call once; a second call is a no-op.
pub fn init(app_name: &str) -> LogGuard {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file_layer, guard) = match std::env::var_os("GAUNTLET_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", app_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed && guard.is_some() {
        tracing::debug!(app = app_name, "file logging enabled");
    }
    LogGuard { _file: guard }
}
