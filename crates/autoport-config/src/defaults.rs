//! Default values shared by the daemon and the client.

/// Loopback host the control listener binds to.
pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";

/// Fixed TCP port of the control listener.
pub const DEFAULT_CONTROL_PORT: u16 = 18890;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory holding the scratch device logs.
pub const DEFAULT_LOG_DIR: &str = ".";

/// Serial device opened when no override is supplied.
pub const DEFAULT_UART_PORT: &str = "/dev/ttyACM0";

/// Baud rate used when no override is supplied.
pub const DEFAULT_UART_BAUDRATE: u32 = 125_000;

/// Serial read timeout in seconds.
pub const DEFAULT_UART_TIMEOUT_SECS: f64 = 0.5;

/// Device-shell executable.
pub const DEFAULT_ADB_PROGRAM: &str = "adb";

/// Device-shell read timeout in seconds.
pub const DEFAULT_ADB_TIMEOUT_SECS: f64 = 1.0;

/// Environment variable naming the serial device.
pub const UART_PORT_ENV: &str = "TESTER_UART_PORT";

/// Environment variable naming the serial baud rate.
pub const UART_BAUDRATE_ENV: &str = "TESTER_UART_BAUDRATE";

/// Environment variable naming the device serial number passed to `adb -s`.
pub const ADB_PORT_ENV: &str = "TESTER_ADB_PORT";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
