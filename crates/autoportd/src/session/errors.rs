//! Error types for device links and session operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::kind::TransportKind;

/// Errors raised while opening, driving, or tearing down a device link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device shell could not be spawned.
    #[error("failed to spawn device shell '{program}': {source}")]
    Spawn {
        /// Executable that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The spawned shell did not expose a requested pipe.
    #[error("device shell did not expose its {stream} pipe")]
    MissingPipe {
        /// Name of the missing stream.
        stream: &'static str,
    },
    /// The serial port could not be opened. Lists the ports that were
    /// visible at the time so operators can spot a renamed device.
    #[error(
        "failed to open serial port '{port}' at {baudrate} baud: {source}; available ports: [{}]",
        .available.join(", ")
    )]
    SerialOpen {
        /// Requested device path.
        port: String,
        /// Requested baud rate.
        baudrate: u32,
        /// Underlying serial error.
        #[source]
        source: serialport::Error,
        /// Ports reported by the system when the open failed.
        available: Vec<String>,
    },
    /// Cloning the serial handle for the reader failed.
    #[error("failed to share serial handle with reader: {source}")]
    SerialClone {
        /// Underlying serial error.
        #[source]
        source: serialport::Error,
    },
    /// The log file could not be prepared.
    #[error("failed to prepare log file '{path}': {source}")]
    Log {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A background thread could not be started.
    #[error("failed to start {role} thread: {source}")]
    Thread {
        /// Role of the thread.
        role: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing to the device failed.
    #[error("failed to write to {kind} link: {source}")]
    Write {
        /// Link kind.
        kind: TransportKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The link is not running.
    #[error("{kind} link is not running")]
    NotRunning {
        /// Link kind.
        kind: TransportKind,
    },
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No transport is connected.
    #[error("no transport is connected")]
    NotConnected,
    /// The active transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
