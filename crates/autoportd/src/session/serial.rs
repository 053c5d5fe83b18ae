//! Serial (UART) transport.

use std::io::{self, BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use tracing::info;

use super::SESSION_TARGET;
use super::errors::TransportError;
use super::kind::TransportKind;
use super::link::LinkCore;
use super::reader::LineSource;

/// Pause after each write so slow peripherals are not overrun.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_millis(50);

struct SerialLines(BufReader<Box<dyn SerialPort>>);

impl LineSource for SerialLines {
    fn read_line(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize> {
        self.0.read_until(b'\n', buffer)
    }

    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.get_mut().set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Transport driving a serial device at a fixed baud rate.
pub(crate) struct SerialTransport {
    port: String,
    baudrate: u32,
    core: LinkCore,
    handle: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SerialTransport")
            .field("port", &self.port)
            .field("baudrate", &self.baudrate)
            .field("core", &self.core)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl SerialTransport {
    pub(crate) fn new(port: String, baudrate: u32, core: LinkCore) -> Self {
        Self {
            port,
            baudrate,
            core,
            handle: None,
        }
    }

    pub(crate) fn core(&self) -> &LinkCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    pub(crate) fn header(&self) -> String {
        format!(
            ">>>>>>>>>> tty log start, port={}, baudrate={}",
            self.port, self.baudrate
        )
    }

    pub(crate) fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baudrate)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some() && self.core.flags().is_running()
    }

    /// Opens the port and starts the reader. A failed open leaves the
    /// transport disconnected and reports the ports that are present.
    pub(crate) fn start(&mut self) -> Result<(), TransportError> {
        if self.handle.is_some() {
            self.stop();
        }
        let port = match serialport::new(&self.port, self.baudrate)
            .timeout(self.core.flags().timeout())
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open()
        {
            Ok(port) => port,
            Err(source) => {
                self.stop();
                return Err(TransportError::SerialOpen {
                    port: self.port.clone(),
                    baudrate: self.baudrate,
                    source,
                    available: available_ports(),
                });
            }
        };
        let reader = port
            .try_clone()
            .map_err(|source| TransportError::SerialClone { source })?;
        let header = self.header();
        let sink = self.core.open_sink(&header)?;
        self.core.start_reader(SerialLines(BufReader::new(reader)), sink)?;
        info!(
            target: SESSION_TARGET,
            port = %self.port,
            baudrate = self.baudrate,
            "serial port opened"
        );
        self.handle = Some(port);
        Ok(())
    }

    /// Writes `text` plus a newline, then waits [`SETTLE_DELAY`].
    pub(crate) fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.core.flags().is_running() {
            return Err(TransportError::NotRunning {
                kind: TransportKind::Serial,
            });
        }
        let port = self.handle.as_mut().ok_or(TransportError::NotRunning {
            kind: TransportKind::Serial,
        })?;
        let written = port
            .write_all(text.as_bytes())
            .and_then(|()| port.write_all(b"\n"))
            .and_then(|()| port.flush());
        if let Err(source) = written {
            self.core.flags().set_running(false);
            return Err(TransportError::Write {
                kind: TransportKind::Serial,
                source,
            });
        }
        thread::sleep(SETTLE_DELAY);
        Ok(())
    }

    /// Stops the reader, closes the port, and drops the scratch log.
    pub(crate) fn stop(&mut self) {
        self.core.flags().set_running(false);
        let limit = self.core.timed_read_join_limit();
        if !self.core.join_reader(limit) {
            self.core.abandon_reader();
        }
        if self.handle.take().is_some() {
            info!(target: SESSION_TARGET, port = %self.port, "serial port closed");
        }
        self.core.discard_log();
    }
}

fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|info| info.port_name).collect())
        .unwrap_or_default()
}
