//! Translation of parsed subcommands into control envelopes.

use std::io::{self, Write};
use std::path;
use std::time::Duration;

use crate::AppError;
use crate::cli::CliCommand;

/// What the daemon writes back before closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyMode {
    /// Nothing; the command is queued and the connection closed.
    None,
    /// A single line such as an environment value or the stop
    /// acknowledgement.
    Line,
}

/// A single `it<function>@<payload>` line bound for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ControlRequest {
    function: &'static str,
    payload: String,
    reply: ReplyMode,
}

impl ControlRequest {
    fn new(function: &'static str, payload: impl Into<String>) -> Self {
        Self {
            function,
            payload: payload.into(),
            reply: ReplyMode::None,
        }
    }

    fn answered(mut self) -> Self {
        self.reply = ReplyMode::Line;
        self
    }

    /// Builds the envelope for `command`. `start` has no envelope.
    ///
    /// Log paths are made absolute here because the daemon runs from a
    /// different working directory.
    pub(crate) fn from_command(command: &CliCommand) -> Result<Option<Self>, AppError> {
        let request = match command {
            CliCommand::Start => return Ok(None),
            CliCommand::Connect { link } => Self::new("connect", link.wire_name()),
            CliCommand::Disconnect { link } => Self::new("disconnect", link.wire_name()),
            CliCommand::Send { text } => Self::new("send", text.join(" ")),
            CliCommand::Logstart { file } => {
                let absolute = path::absolute(file).map_err(|source| AppError::LogPath {
                    path: file.clone(),
                    source,
                })?;
                Self::new("logstart", absolute.display().to_string())
            }
            CliCommand::Logstop => Self::new("logstop", ""),
            CliCommand::Timestamp => Self::new("set_timestamp", ""),
            CliCommand::Timeout { seconds } => Self::new("set_timeout", seconds.to_string()),
            CliCommand::SendLog { text } => Self::new("send_log", text.join(" ")),
            CliCommand::WaitLog { text } => Self::new("wait_log", text.join(" ")),
            CliCommand::Pause { millis } => Self::new(
                "pause",
                Duration::from_millis(*millis).as_secs_f64().to_string(),
            ),
            CliCommand::GetEnv { key } => Self::new("get_env", key.as_str()).answered(),
            CliCommand::SetEnv { key, value } => {
                Self::new("set_env", format!("{key} {}", value.join(" ")))
            }
            CliCommand::Stop => Self::new("stop", "").answered(),
        };
        Ok(Some(request))
    }

    pub(crate) fn function(&self) -> &'static str {
        self.function
    }

    pub(crate) fn reply(&self) -> ReplyMode {
        self.reply
    }

    /// Writes the newline-terminated envelope.
    pub(crate) fn write_line<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "it{}@{}", self.function, self.payload)?;
        writer.flush()
    }
}
