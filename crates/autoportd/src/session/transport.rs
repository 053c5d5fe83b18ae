//! Tagged union over the two device links and the factory that builds them.

use std::path::PathBuf;
use std::time::Duration;

use autoport_config::Config;

use super::errors::TransportError;
use super::kind::TransportKind;
use super::link::LinkCore;
use super::log_sink::LogPlan;
use super::serial::SerialTransport;
use super::shell::ShellTransport;

/// Settings applied to every link the session opens.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOptions {
    /// Directory holding the scratch `adb.log` and `tty.log` files.
    pub log_dir: PathBuf,
    /// Device-shell executable.
    pub adb_program: String,
    /// Initial read timeout for shell links.
    pub adb_timeout: Duration,
    /// Initial read timeout for serial links.
    pub uart_timeout: Duration,
    /// Mirror device output on stdout.
    pub echo: bool,
}

impl LinkOptions {
    /// Derives link settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config, echo: bool) -> Self {
        Self {
            log_dir: config.log_dir.as_std_path().to_path_buf(),
            adb_program: config.adb_program.clone(),
            adb_timeout: config.adb_timeout(),
            uart_timeout: config.uart_timeout(),
            echo,
        }
    }

    /// Scratch log used by `kind` when no `logstart` is active.
    #[must_use]
    pub fn scratch_log(&self, kind: TransportKind) -> PathBuf {
        self.log_dir.join(kind.default_log_name())
    }

    fn timeout(&self, kind: TransportKind) -> Duration {
        match kind {
            TransportKind::Shell => self.adb_timeout,
            TransportKind::Serial => self.uart_timeout,
        }
    }
}

/// Device addressed by a `connect`, resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Device shell, optionally pinned to a device serial number.
    Shell {
        /// Serial passed to `adb -s`; empty selects the only attached device.
        serial: String,
    },
    /// Serial port at a baud rate.
    Serial {
        /// Device path.
        port: String,
        /// Baud rate.
        baudrate: u32,
    },
}

impl LinkTarget {
    /// Kind of link this target needs.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Shell { .. } => TransportKind::Shell,
            Self::Serial { .. } => TransportKind::Serial,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Transport {
    Shell(ShellTransport),
    Serial(SerialTransport),
}

impl Transport {
    /// Builds an unopened transport for `target` with a scratch log.
    pub(crate) fn create(target: LinkTarget, options: &LinkOptions) -> Self {
        let kind = target.kind();
        let core = LinkCore::new(
            kind,
            options.timeout(kind),
            LogPlan::scratch(options.scratch_log(kind)),
            options.echo,
        );
        match target {
            LinkTarget::Shell { serial } => {
                Self::Shell(ShellTransport::new(options.adb_program.clone(), serial, core))
            }
            LinkTarget::Serial { port, baudrate } => {
                Self::Serial(SerialTransport::new(port, baudrate, core))
            }
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.core().kind()
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Shell(shell) => shell.describe(),
            Self::Serial(serial) => serial.describe(),
        }
    }

    pub(crate) fn is_running(&mut self) -> bool {
        match self {
            Self::Shell(shell) => shell.is_running(),
            Self::Serial(serial) => serial.is_running(),
        }
    }

    pub(crate) fn start(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Shell(shell) => shell.start(),
            Self::Serial(serial) => serial.start(),
        }
    }

    pub(crate) fn stop(&mut self) {
        match self {
            Self::Shell(shell) => shell.stop(),
            Self::Serial(serial) => serial.stop(),
        }
    }

    pub(crate) fn send(&mut self, text: &str) -> Result<(), TransportError> {
        match self {
            Self::Shell(shell) => shell.send(text),
            Self::Serial(serial) => serial.send(text),
        }
    }

    pub(crate) fn append_note(&self, text: &str) -> Result<(), TransportError> {
        self.core().append_note(text)
    }

    pub(crate) fn wait_for_text(&self, text: &str) -> bool {
        self.core().wait_for_text(text)
    }

    pub(crate) fn set_timeout(&self, timeout: Duration) {
        self.core().flags().set_timeout(timeout);
    }

    pub(crate) fn enable_timestamp(&self) {
        self.core().flags().enable_timestamp();
    }

    pub(crate) fn log_plan(&self) -> &LogPlan {
        self.core().log()
    }

    /// Switches to a new log. A running link is restarted against the same
    /// device so the new file starts with its own header; a stopped link only
    /// records the plan for its next start.
    pub(crate) fn set_log(&mut self, plan: LogPlan) -> Result<(), TransportError> {
        if !self.is_running() {
            self.core_mut().replace_log(plan);
            return Ok(());
        }
        self.stop();
        self.core_mut().replace_log(plan);
        self.start()
    }

    fn core(&self) -> &LinkCore {
        match self {
            Self::Shell(shell) => shell.core(),
            Self::Serial(serial) => serial.core(),
        }
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        match self {
            Self::Shell(shell) => shell.core_mut(),
            Self::Serial(serial) => serial.core_mut(),
        }
    }
}
