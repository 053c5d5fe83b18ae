//! Error types and diagnostics helpers for the client runtime.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Hint printed when no daemon answers on the control socket.
pub(crate) const NOT_RUNNING_HINT: &str = "Did you run autoport start?";

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to resolve log path {path:?}: {source}")]
    LogPath { path: PathBuf, source: io::Error },
    #[error("failed to resolve daemon address {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to connect to daemon at {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[error("failed to send {function} to daemon: {source}")]
    SendRequest {
        function: &'static str,
        source: io::Error,
    },
    #[error("failed to read reply to {function}: {source}")]
    ReadResponse {
        function: &'static str,
        source: io::Error,
    },
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error("daemon lifecycle command failed: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Determines whether an error indicates the daemon is not running.
pub(crate) fn is_daemon_not_running(error: &AppError) -> bool {
    match error {
        AppError::Connect { source, .. } => matches!(
            source.kind(),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable
        ),
        _ => false,
    }
}
