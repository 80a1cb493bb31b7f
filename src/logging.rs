//! Subscriber setup for the `trackbridge` binary.
//!
//! The library itself only emits `tracing` events; applications embedding
//! it install their own subscriber. The CLI writes a full trace to a file
//! under the user's data directory and repeats warnings on stderr, leaving
//! stdout to issue output.

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is unset: our own events from `info`, other
/// crates from `warn`.
const DEFAULT_LOG_FILTER: &str = "trackbridge=info,warn";

/// Prefix of the rotated log files; the appender adds the date.
const LOG_FILE_NAME: &str = "trackbridge.log";

/// Install the global subscriber, logging to [`log_directory`].
///
/// `RUST_LOG` overrides the default filter. `trackbridge=debug` records
/// every backend request and cache fetch, `trackbridge=trace` cache hits
/// as well.
///
/// # Errors
///
/// Fails when no data directory is known for this platform, when the log
/// directory cannot be created, or when a global subscriber is already
/// installed.
pub fn init() -> anyhow::Result<()> {
    let dir = get_log_directory()?;
    init_in(&dir)
}

fn init_in(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let to_file = fmt::layer()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME))
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let to_stderr = fmt::layer()
        .with_writer(std::io::stderr.with_max_level(Level::WARN))
        .with_target(false)
        .compact();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(to_file)
            .with(to_stderr)
            .with(filter),
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %dir.display(),
        "trackbridge started"
    );
    Ok(())
}

fn get_log_directory() -> anyhow::Result<PathBuf> {
    let data = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("no local data directory on this platform"))?;
    Ok(data.join("trackbridge").join("logs"))
}

/// `<local data dir>/trackbridge/logs`, if the platform has a data dir.
pub fn log_directory() -> Option<PathBuf> {
    get_log_directory().ok()
}

/// Record a clean exit.
pub fn shutdown() {
    tracing::info!("trackbridge exiting");
}
