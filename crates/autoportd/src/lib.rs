//! Session daemon for UART and device-shell test rigs.
//!
//! `autoportd` keeps a single hardware session alive between short-lived
//! client invocations. Clients connect to a loopback control socket and send
//! one `it<function>@<payload>` line each; the daemon queues every line and
//! applies them in order against the session, which owns at most one
//! transport: an `adb shell` subprocess or a serial port. Device output is
//! captured by a reader thread per transport into a log file.
//!
//! Start-up follows the usual daemon shape: load configuration, take the
//! runtime lock, optionally detach, write the pid marker, then bind the
//! control socket and start the dispatcher. A `stop` command or a
//! termination signal tears the session down on the dispatcher thread before
//! the runtime files are removed and the `stop` client is answered.

mod bootstrap;
mod control;
mod dispatch;
mod health;
mod lifecycle;
mod process;
mod session;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use control::ListenerError;
pub use dispatch::{
    Command, CommandReceiver, CommandSender, DisconnectTarget, Envelope, EnvelopeError,
    QueueClosed, command_channel,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use lifecycle::ShutdownEvent;
pub use process::{
    DaemonizeError, Daemonizer, LaunchError, LaunchMode, ShutdownError, ShutdownSignal,
    SystemDaemonizer, SystemShutdownSignal, run_daemon,
};
pub use session::{
    DeviceDefaults, DeviceEnvironment, LinkOptions, LinkTarget, Session, SessionError,
    TransportError, TransportKind, TransportKindParseError,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
