//! CLI argument definitions for the autoport client.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line interface for driving an `autoportd` session.
#[derive(Parser, Debug)]
#[command(name = "autoport", disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Device links accepted by `connect`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LinkArg {
    /// Device shell through `adb shell`.
    Adb,
    /// Serial port.
    Uart,
    /// Serial port, historic spelling.
    Tty,
}

impl LinkArg {
    pub(crate) const fn wire_name(self) -> &'static str {
        match self {
            Self::Adb => "adb",
            Self::Uart => "uart",
            Self::Tty => "tty",
        }
    }
}

/// Targets accepted by `disconnect`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum DisconnectArg {
    Adb,
    Uart,
    Tty,
    /// Whatever link is open.
    All,
}

impl DisconnectArg {
    pub(crate) const fn wire_name(self) -> &'static str {
        match self {
            Self::Adb => "adb",
            Self::Uart => "uart",
            Self::Tty => "tty",
            Self::All => "all",
        }
    }
}

/// One subcommand per daemon function.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub(crate) enum CliCommand {
    /// Starts the daemon and waits until it is ready.
    Start,
    /// Opens a device link, starting the daemon when it is not running.
    Connect {
        #[arg(value_enum)]
        link: LinkArg,
    },
    /// Closes a device link.
    Disconnect {
        #[arg(value_enum, default_value_t = DisconnectArg::All)]
        link: DisconnectArg,
    },
    /// Writes a line to the connected device.
    Send {
        #[arg(
            value_name = "TEXT",
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        text: Vec<String>,
    },
    /// Captures device output into FILE until `logstop`.
    Logstart {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Returns device output to the scratch log.
    Logstop,
    /// Prefixes later log lines with a timestamp.
    Timestamp,
    /// Sets the device read timeout.
    Timeout {
        #[arg(value_name = "SECONDS")]
        seconds: f64,
    },
    /// Writes TEXT into the device log.
    SendLog {
        #[arg(
            value_name = "TEXT",
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        text: Vec<String>,
    },
    /// Holds later commands until TEXT appears in the device log or the read
    /// timeout passes.
    WaitLog {
        #[arg(
            value_name = "TEXT",
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        text: Vec<String>,
    },
    /// Delays the commands queued after this one.
    Pause {
        #[arg(value_name = "MILLIS")]
        millis: u64,
    },
    /// Prints a device environment value.
    GetEnv {
        key: String,
    },
    /// Overrides a device environment value in the daemon.
    SetEnv {
        key: String,
        #[arg(
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        value: Vec<String>,
    },
    /// Disconnects and stops the daemon, returning once it has exited.
    Stop,
}

impl CliCommand {
    /// Whether the daemon should be launched when its pid marker is absent.
    pub(crate) const fn starts_daemon(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Connect { .. } | Self::Disconnect { .. }
        )
    }
}
