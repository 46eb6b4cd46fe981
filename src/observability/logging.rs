use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_DIR: &str = "logs";

/// Initializes the logging system with both console and file output.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process.
pub fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("audience_pulse=info,tower_http=info"));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if fs::create_dir_all(LOG_DIR).is_err() {
        tracing_subscriber::registry().with(filter).with(console_layer).init();
        return None;
    }

    // Daily rotated JSON log for machine consumption
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "audience_pulse.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Some(guard)
}
