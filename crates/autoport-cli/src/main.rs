//! CLI entrypoint for the autoport session client.
//!
//! Every invocation sends one command to `autoportd` and exits; see
//! [`autoport_cli::run`].

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    autoport_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
