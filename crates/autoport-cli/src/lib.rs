//! Command-line client for the autoport session daemon.
//!
//! Each invocation parses one subcommand, loads the shared configuration,
//! launches `autoportd` when a link command finds no pid marker, and sends a
//! single `it<function>@<payload>` line to the control socket. `get-env` and
//! `stop` wait for the daemon's one-line reply and print it.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;

mod cli;
mod command;
mod config;
mod errors;
mod lifecycle;
mod transport;

use cli::{Cli, CliCommand};
use command::ControlRequest;
use config::{command_arguments, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use errors::{NOT_RUNNING_HINT, is_daemon_not_running};
use lifecycle::{DaemonState, LaunchContext, ensure_daemon};

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'r, 'a, W: Write, E: Write, L: ConfigLoader> {
    io: &'r mut IoStreams<'a, W, E>,
    loader: &'r L,
    daemon_binary: Option<&'r OsStr>,
}

impl<'r, 'a, W, E, L> CliRunner<'r, 'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(
        io: &'r mut IoStreams<'a, W, E>,
        loader: &'r L,
        daemon_binary: Option<&'r OsStr>,
    ) -> Self {
        Self {
            io,
            loader,
            daemon_binary,
        }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        match self.try_run(&args) {
            Ok(exit_code) => exit_code,
            Err(AppError::CliUsage(error))
                if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
            {
                self.report_to_stdout(&error)
            }
            Err(error) => {
                if writeln!(self.io.stderr, "{error}").is_ok() && is_daemon_not_running(&error) {
                    drop(writeln!(self.io.stderr, "{NOT_RUNNING_HINT}"));
                }
                ExitCode::FAILURE
            }
        }
    }

    fn report_to_stdout(&mut self, message: &clap::Error) -> ExitCode {
        match write!(self.io.stdout, "{message}") {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        }
    }

    fn try_run(&mut self, args: &[OsString]) -> Result<ExitCode, AppError> {
        let split = split_config_arguments(args);
        let cli = Cli::try_parse_from(command_arguments(args, &split)).map_err(AppError::CliUsage)?;
        let config = self.loader.load(&split.config_arguments)?;

        if cli.command.starts_daemon() {
            let context = LaunchContext {
                config: &config,
                config_arguments: &split.config_arguments,
                daemon_binary: self.daemon_binary,
            };
            self.launch(context, &cli.command)?;
        }

        let Some(request) = ControlRequest::from_command(&cli.command)? else {
            return Ok(ExitCode::SUCCESS);
        };
        if let Some(reply) = transport::send(&config, &request)? {
            self.io
                .stdout
                .write_all(reply.as_bytes())
                .and_then(|()| self.io.stdout.flush())
                .map_err(AppError::WriteOutput)?;
        }
        Ok(ExitCode::SUCCESS)
    }

    fn launch(&mut self, context: LaunchContext<'_>, command: &CliCommand) -> Result<(), AppError> {
        let state = ensure_daemon(context, &mut *self.io.stderr)?;
        if !matches!(command, CliCommand::Start) {
            return Ok(());
        }
        match state {
            DaemonState::Running { pid: Some(pid) } => {
                writeln!(self.io.stdout, "autoportd already running (pid {pid})")
            }
            DaemonState::Running { pid: None } => writeln!(self.io.stdout, "autoportd already running"),
            DaemonState::Started(snapshot) => writeln!(
                self.io.stdout,
                "autoportd ready (pid {}) on {}",
                snapshot.pid,
                snapshot.control.as_deref().unwrap_or("the configured control port")
            ),
        }
        .map_err(AppError::WriteOutput)
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader, None)
}

/// Runs the CLI with a custom configuration loader and, optionally, an
/// explicit daemon binary in place of `AUTOPORTD_BIN`.
#[must_use]
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
    daemon_binary: Option<&OsStr>,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader, daemon_binary).run(args)
}

#[cfg(test)]
mod tests;
