//! Tracing setup for the host program: compact stdout output plus a
//! daily-rotated log file. Level filtering comes from `RUST_LOG`, defaulting
//! to `info`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber. Panics if called twice.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_appender = tracing_appender::rolling::daily(log_path, "trawl.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact();

    let stdout_layer = fmt::layer().with_target(false).compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The writer guard must outlive the program for the background logger to
    // keep flushing.
    Box::leak(Box::new(guard));

    tracing::debug!("logging to {}/trawl.log", log_path.display());
    Ok(())
}
