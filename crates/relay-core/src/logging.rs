//! Tracing setup for the relay binaries.
//!
//! Filter comes from `RELAY_LOG` (EnvFilter syntax). Events go to stderr, and
//! optionally to a daily rolling file under `$RELAY_HOME/logs`.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::paths;

pub const LOG_ENV: &str = "RELAY_LOG";
pub const DEFAULT_FILTER: &str = "warn,relay_core=info";
const LOG_FILE_PREFIX: &str = "relay.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Raise the default filter to `debug` for relay crates.
    pub verbose: bool,
    /// Directory for the rolling file; `None` disables the file layer.
    pub file_dir: Option<PathBuf>,
}

impl LogOptions {
    /// Stderr plus a file under `$RELAY_HOME/logs`.
    pub fn with_default_file(verbose: bool) -> Self {
        Self {
            verbose,
            file_dir: Some(paths::logs_dir()),
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,relay_core=debug,relay_cli=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    })
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive until exit so buffered file output is flushed.
///
/// # Errors
/// Fails if the log directory cannot be created or a subscriber is already set.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter(options.verbose));

    let Some(dir) = options.file_dir.as_ref() else {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    };

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter(options.verbose));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(Some(guard))
}
