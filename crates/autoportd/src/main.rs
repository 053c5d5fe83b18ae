use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match autoportd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed yet.
            drop(writeln!(io::stderr(), "autoportd: {error}"));
            ExitCode::FAILURE
        }
    }
}
