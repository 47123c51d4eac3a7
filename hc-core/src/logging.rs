//! Structured logging setup using the `tracing` ecosystem.
//!
//! Components log through `tracing` macros with a `category` field
//! (`connection`, `heartbeat`, `dispatch`, `handlers`, `broadcast`,
//! `keys`, `encryption`) and structured metadata fields. This module
//! installs the subscriber that renders them.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::rolling;

use crate::error::HcResult;

/// Initialize the global tracing subscriber.
///
/// Sets up:
/// - Console output (stderr) in compact form
/// - File output with daily rotation, as text or JSON
/// - Level filtering from `level` (an `EnvFilter` directive)
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> HcResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, "hipaa-chat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_new(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    if json_output {
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| crate::error::HcError::Internal(format!("logging already initialized: {e}")))?;
    } else {
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| crate::error::HcError::Internal(format!("logging already initialized: {e}")))?;
    }

    tracing::info!(category = "logging", level, dir = %log_dir.display(), "logging initialized");

    Ok(LogGuard { _guard: guard })
}

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize a minimal console-only logger for testing or simple CLI usage.
pub fn init_console_logging(level: &str) {
    let env_filter = EnvFilter::try_new(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
}
