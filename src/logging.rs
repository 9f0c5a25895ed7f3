//! Tracing subscriber setup.
//!
//! Logs always go to `<log_dir>/<log_file>` (read by the dashboard) and to
//! stdout only when it is attached to a terminal, so cron runs stay quiet.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init_logging(log_dir: &Path, log_file: &str, json: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);
    let file_layer = if json {
        file_layer.json().boxed()
    } else {
        file_layer.boxed()
    };

    let stdout_layer = std::io::stdout().is_terminal().then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_ansi(true)
    });

    let filter = EnvFilter::from_default_env()
        .add_directive("vibe_trader=debug".parse()?)
        .add_directive(Level::INFO.into());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
