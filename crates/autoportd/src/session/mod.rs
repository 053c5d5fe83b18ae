//! The daemon's single hardware session.
//!
//! [`Session`] owns at most one `Transport`: a device shell or a serial
//! port. It is constructed once at startup and mutated only by the
//! dispatcher thread. Reader and writer threads spawned by a transport touch
//! nothing but their log file and the link's `running` flag.
//!
//! Connecting to a different kind while a link is up disconnects the old
//! link first, so a shell is never stranded behind a serial session. A
//! second `connect` to a kind that is already running does nothing.

mod environment;
mod errors;
mod kind;
mod link;
mod log_sink;
mod reader;
mod serial;
mod shell;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autoport_config::{ADB_PORT_ENV, Config, UART_BAUDRATE_ENV, UART_PORT_ENV};
use tracing::{debug, warn};

pub use environment::DeviceEnvironment;
pub use errors::{SessionError, TransportError};
pub use kind::{TransportKind, TransportKindParseError};
pub(crate) use log_sink::LogPlan;
pub use transport::{LinkOptions, LinkTarget};

use crate::health::HealthReporter;
use transport::Transport;

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Device defaults consulted when the environment has no override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDefaults {
    /// Serial device path.
    pub uart_port: String,
    /// Serial baud rate.
    pub uart_baudrate: u32,
    /// Device serial for the shell; empty selects the default device.
    pub adb_port: String,
}

impl DeviceDefaults {
    /// Extracts device defaults from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            uart_port: config.uart_port.clone(),
            uart_baudrate: config.uart_baudrate,
            adb_port: config.adb_port.clone(),
        }
    }
}

/// Owner of the active transport.
pub struct Session {
    options: LinkOptions,
    defaults: DeviceDefaults,
    environment: DeviceEnvironment,
    reporter: Arc<dyn HealthReporter>,
    active: Option<Transport>,
}

impl Session {
    /// Creates an idle session.
    #[must_use]
    pub fn new(
        options: LinkOptions,
        defaults: DeviceDefaults,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            options,
            defaults,
            environment: DeviceEnvironment::default(),
            reporter,
            active: None,
        }
    }

    /// Kind of the selected transport, if any.
    #[must_use]
    pub fn active_kind(&self) -> Option<TransportKind> {
        self.active.as_ref().map(Transport::kind)
    }

    /// Whether a transport is selected and reports itself running.
    pub fn connect_check(&mut self) -> bool {
        self.active.as_mut().is_some_and(Transport::is_running)
    }

    /// Environment overlay consulted at connect time.
    #[must_use]
    pub fn environment(&self) -> &DeviceEnvironment {
        &self.environment
    }

    /// Mutable access for `set_env`.
    pub fn environment_mut(&mut self) -> &mut DeviceEnvironment {
        &mut self.environment
    }

    /// Resolves the device for `kind` from overlay, process environment,
    /// and configuration, in that order.
    #[must_use]
    pub fn resolve_target(&self, kind: TransportKind) -> LinkTarget {
        match kind {
            TransportKind::Shell => LinkTarget::Shell {
                serial: self
                    .environment
                    .get(ADB_PORT_ENV)
                    .unwrap_or_else(|| self.defaults.adb_port.clone()),
            },
            TransportKind::Serial => LinkTarget::Serial {
                port: self
                    .environment
                    .get(UART_PORT_ENV)
                    .unwrap_or_else(|| self.defaults.uart_port.clone()),
                baudrate: self.resolve_baudrate(),
            },
        }
    }

    fn resolve_baudrate(&self) -> u32 {
        let Some(raw) = self.environment.get(UART_BAUDRATE_ENV) else {
            return self.defaults.uart_baudrate;
        };
        match raw.trim().parse::<u32>() {
            Ok(baudrate) => baudrate,
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    value = %raw,
                    error = %error,
                    fallback = self.defaults.uart_baudrate,
                    "ignoring unparsable baud rate"
                );
                self.defaults.uart_baudrate
            }
        }
    }

    /// Selects `kind` and opens a fresh transport for it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] when the link cannot be opened.
    /// The kind stays selected so `connect_check` reports it as not running.
    pub fn connect(&mut self, kind: TransportKind) -> Result<(), SessionError> {
        if let Some(active) = self.active.as_mut() {
            if active.kind() == kind && active.is_running() {
                debug!(target: SESSION_TARGET, link = %kind, "already connected; ignoring connect");
                return Ok(());
            }
            self.release_active();
        }
        let mut transport = Transport::create(self.resolve_target(kind), &self.options);
        let result = transport.start();
        match &result {
            Ok(()) => self.reporter.transport_connected(kind, &transport.describe()),
            Err(error) => self.reporter.transport_failed(kind, error),
        }
        self.active = Some(transport);
        result.map_err(SessionError::from)
    }

    /// Disconnects the active transport when it matches `kind`, freeing the
    /// selection. Other kinds are left alone.
    pub fn disconnect(&mut self, kind: TransportKind) {
        if self.active_kind() == Some(kind) {
            self.release_active();
        } else {
            debug!(target: SESSION_TARGET, link = %kind, "no such link connected; ignoring disconnect");
        }
    }

    /// Disconnects whatever is selected and frees the session.
    pub fn disconnect_all(&mut self) {
        self.release_active();
    }

    fn release_active(&mut self) {
        if let Some(mut transport) = self.active.take() {
            transport.stop();
            self.reporter.transport_closed(transport.kind());
        }
    }

    /// Sends one line of text to the active transport.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport, or the
    /// transport's write failure.
    pub fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let transport = self.active.as_mut().ok_or(SessionError::NotConnected)?;
        let kind = transport.kind();
        transport.send(text).map_err(|error| {
            self.reporter.transport_failed(kind, &error);
            SessionError::from(error)
        })
    }

    /// Writes operator text into the active log as if the device had printed
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport, or the
    /// failure to append to the log.
    pub fn send_log(&mut self, text: &str) -> Result<(), SessionError> {
        let transport = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        transport.append_note(text)?;
        Ok(())
    }

    /// Blocks until the active log contains `text` or the link's read timeout
    /// passes. Returns whether the text appeared.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport.
    pub fn wait_log(&mut self, text: &str) -> Result<bool, SessionError> {
        let transport = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        Ok(transport.wait_for_text(text))
    }

    /// Restarts the active transport against an operator log that survives
    /// disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport, or the
    /// failure to restart the link.
    pub fn start_log(&mut self, path: PathBuf) -> Result<(), SessionError> {
        self.switch_log(LogPlan::saved(path))
    }

    /// Restarts the active transport against its scratch log. The previous
    /// operator log is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport, or the
    /// failure to restart the link.
    pub fn stop_log(&mut self) -> Result<(), SessionError> {
        let kind = self.active_kind().ok_or(SessionError::NotConnected)?;
        self.switch_log(LogPlan::scratch(self.options.scratch_log(kind)))
    }

    fn switch_log(&mut self, plan: LogPlan) -> Result<(), SessionError> {
        let transport = self.active.as_mut().ok_or(SessionError::NotConnected)?;
        let kind = transport.kind();
        match transport.set_log(plan) {
            Ok(()) => {
                debug!(
                    target: SESSION_TARGET,
                    link = %kind,
                    file = %transport.log_plan().path().display(),
                    save = transport.log_plan().save(),
                    "log switched"
                );
                Ok(())
            }
            Err(error) => {
                self.reporter.transport_failed(kind, &error);
                Err(error.into())
            }
        }
    }

    /// Updates the read timeout of the active transport.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let transport = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        transport.set_timeout(timeout);
        Ok(())
    }

    /// Prefixes every later log line with a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a transport.
    pub fn enable_timestamp(&mut self) -> Result<(), SessionError> {
        let transport = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        transport.enable_timestamp();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_active();
    }
}
