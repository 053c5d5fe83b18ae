//! Shared configuration for the autoport session daemon and its client.
//!
//! Values are layered by [`ortho_config`]: defaults, then configuration
//! files, then `TESTER_*` environment variables, then command-line flags.
//! The `TESTER_` prefix keeps the historic variable names operators already
//! export for their rigs (`TESTER_UART_PORT`, `TESTER_UART_BAUDRATE`,
//! `TESTER_ADB_PORT`).
//!
//! Device settings loaded here are only the fallbacks; the daemon resolves
//! the effective port, baud rate and device serial again at every `connect`
//! so overrides applied with `set_env` take effect on the next connection.

mod defaults;
mod logging;
mod runtime;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    ADB_PORT_ENV, DEFAULT_ADB_PROGRAM, DEFAULT_ADB_TIMEOUT_SECS, DEFAULT_CONTROL_HOST,
    DEFAULT_CONTROL_PORT, DEFAULT_LOG_DIR, DEFAULT_LOG_FILTER, DEFAULT_UART_BAUDRATE,
    DEFAULT_UART_PORT, DEFAULT_UART_TIMEOUT_SECS, UART_BAUDRATE_ENV, UART_PORT_ENV,
    default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Resolved configuration shared by `autoportd` and `autoport`.
///
/// Every field carries a loader-level default so an invocation with no
/// flags, variables or files still resolves.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TESTER")]
#[serde(default)]
pub struct Config {
    /// Loopback host the control listener binds to.
    #[ortho_config(default = DEFAULT_CONTROL_HOST.to_owned())]
    pub control_host: String,
    /// TCP port of the control listener.
    #[ortho_config(default = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,
    /// Directory for the pid marker, lock and health snapshot.
    pub runtime_dir: Option<Utf8PathBuf>,
    /// Directory holding the scratch `adb.log` and `tty.log` files.
    #[ortho_config(default = Utf8PathBuf::from(DEFAULT_LOG_DIR))]
    pub log_dir: Utf8PathBuf,
    /// Tracing filter expression for daemon telemetry.
    #[ortho_config(default = default_log_filter().to_owned())]
    pub log_filter: String,
    /// Output format for daemon telemetry.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Serial device used when `TESTER_UART_PORT` is unset at connect time.
    #[ortho_config(default = DEFAULT_UART_PORT.to_owned())]
    pub uart_port: String,
    /// Baud rate used when `TESTER_UART_BAUDRATE` is unset at connect time.
    #[ortho_config(default = DEFAULT_UART_BAUDRATE)]
    pub uart_baudrate: u32,
    /// Serial read timeout in seconds.
    #[ortho_config(default = DEFAULT_UART_TIMEOUT_SECS)]
    pub uart_timeout: f64,
    /// Device serial passed to `adb -s`; empty selects the default device.
    #[ortho_config(default = String::new())]
    pub adb_port: String,
    /// Device-shell executable.
    #[ortho_config(default = DEFAULT_ADB_PROGRAM.to_owned())]
    pub adb_program: String,
    /// Device-shell read timeout in seconds.
    #[ortho_config(default = DEFAULT_ADB_TIMEOUT_SECS)]
    pub adb_timeout: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_host: DEFAULT_CONTROL_HOST.to_owned(),
            control_port: DEFAULT_CONTROL_PORT,
            runtime_dir: None,
            log_dir: Utf8PathBuf::from(DEFAULT_LOG_DIR),
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
            uart_port: DEFAULT_UART_PORT.to_owned(),
            uart_baudrate: DEFAULT_UART_BAUDRATE,
            uart_timeout: DEFAULT_UART_TIMEOUT_SECS,
            adb_port: String::new(),
            adb_program: DEFAULT_ADB_PROGRAM.to_owned(),
            adb_timeout: DEFAULT_ADB_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Host and port of the control listener.
    #[must_use]
    pub fn control_endpoint(&self) -> (&str, u16) {
        (self.control_host.as_str(), self.control_port)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Telemetry output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Serial read timeout.
    #[must_use]
    pub fn uart_timeout(&self) -> Duration {
        seconds(self.uart_timeout, DEFAULT_UART_TIMEOUT_SECS)
    }

    /// Device-shell read timeout.
    #[must_use]
    pub fn adb_timeout(&self) -> Duration {
        seconds(self.adb_timeout, DEFAULT_ADB_TIMEOUT_SECS)
    }
}

/// Converts operator-supplied seconds into a [`Duration`], substituting the
/// fallback for negative or non-finite values.
fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}
