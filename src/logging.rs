//! Tracing setup for CLI runs and the detached daemon.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::daemon::LOG_FILE_PREFIX;

const NOISY_DEPS: &str = "ort=warn,reqwest=warn,hyper=warn,hyper_util=warn,mio=warn";
const KEEP_LOG_FILES: usize = 7;

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { "speakcache=debug,info" } else { "info" };
        EnvFilter::new(format!("{level},{NOISY_DEPS}"))
    })
}

/// Compact stderr output for interactive commands.
pub fn init_cli(debug: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// Daily-rolling `daemon.log` in `dir`, plus stderr when attached to a terminal.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_daemon(dir: &Path, debug: bool) -> Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(KEEP_LOG_FILES)
        .build(dir)
        .with_context(|| format!("creating log appender in {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let console_layer = std::io::IsTerminal::is_terminal(&std::io::stderr())
        .then(|| fmt::layer().with_writer(std::io::stderr).compact());

    let _ = tracing_subscriber::registry()
        .with(filter(debug))
        .with(file_layer)
        .with(console_layer)
        .try_init();
    tracing::info!(log_dir = %dir.display(), "daemon logging initialized");
    Ok(guard)
}
