//! Detaches `autoportd` from the client that launched it.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use autoport_config::RuntimePaths;

use super::PROCESS_TARGET;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonizeError`] when the process cannot detach.
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The background telemetry log could not be opened.
    #[error("failed to open daemon log {path:?}: {source}")]
    Log {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Forking or detaching failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser backed by `daemonize-me`.
///
/// The detached process keeps the runtime directory as its working
/// directory and sends its stderr, and with it all telemetry, to
/// `autoportd.log` there. Device output echo is a foreground-only feature,
/// so stdout is discarded.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        let log = open_daemon_log(paths)?;
        info!(
            target: PROCESS_TARGET,
            runtime = %paths.runtime_dir().display(),
            log = %paths.daemon_log_path().display(),
            "detaching from the launching client"
        );
        Daemon::new()
            .work_dir(paths.runtime_dir())
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .stderr(log)
            .start()?;
        info!(target: PROCESS_TARGET, "running detached");
        Ok(())
    }
}

fn open_daemon_log(paths: &RuntimePaths) -> Result<File, DaemonizeError> {
    let path = paths.daemon_log_path();
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DaemonizeError::Log {
            path: path.to_path_buf(),
            source,
        })
}
