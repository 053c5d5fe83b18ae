//! Decoding of `it<function>@<payload>` control lines.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::{TransportKind, TransportKindParseError};

const PREFIX: &str = "it";
const SEPARATOR: char = '@';

/// A control line split into its function name and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    function: String,
    payload: String,
}

impl Envelope {
    /// Builds an envelope from parts.
    #[must_use]
    pub fn new(function: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            payload: payload.into(),
        }
    }

    /// The `stop` envelope raised by signals and clients alike.
    #[must_use]
    pub fn stop() -> Self {
        Self::new("stop", "")
    }

    /// Parses one line. Trailing line terminators and leading whitespace are
    /// ignored; everything after the first `@` is payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] when the line is not an envelope.
    pub fn parse(line: &str) -> Result<Self, EnvelopeError> {
        let line = line.trim_start().trim_end_matches(['\r', '\n']);
        let body = line
            .strip_prefix(PREFIX)
            .ok_or(EnvelopeError::MissingPrefix)?;
        let (function, payload) = body
            .split_once(SEPARATOR)
            .ok_or(EnvelopeError::MissingSeparator)?;
        if function.is_empty() {
            return Err(EnvelopeError::EmptyFunction);
        }
        Ok(Self::new(function, payload))
    }

    /// Function name.
    #[must_use]
    pub fn function(&self) -> &str {
        self.function.as_str()
    }

    /// Raw payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.payload.as_str()
    }
}

/// Target of a `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectTarget {
    /// Only the named kind.
    Kind(TransportKind),
    /// Whatever is connected.
    All,
}

/// A decoded command ready for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `connect@<adb|tty>`.
    Connect(TransportKind),
    /// `disconnect@<adb|tty|all>`.
    Disconnect(DisconnectTarget),
    /// `send@<text>`.
    Send(String),
    /// `logstart@<file>`.
    LogStart(PathBuf),
    /// `logstop@`.
    LogStop,
    /// `set_timestamp@`.
    SetTimestamp,
    /// `set_timeout@<seconds>`.
    SetTimeout(Duration),
    /// `send_log@<text>`.
    SendLog(String),
    /// `wait_log@<text>`.
    WaitLog(String),
    /// `pause@<seconds>`.
    Pause(Duration),
    /// `get_env@<key>`.
    GetEnv(String),
    /// `set_env@<key> <value>`.
    SetEnv {
        /// Variable name.
        key: String,
        /// Variable value.
        value: String,
    },
    /// `stop@`.
    Stop,
}

impl Command {
    /// Decodes an envelope. Unknown functions decode to `Ok(None)` so newer
    /// clients can talk to older daemons.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when a known function carries an unusable
    /// payload.
    pub fn decode(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        let function = envelope.function();
        let payload = envelope.payload();
        let command = match function {
            "connect" => Self::Connect(parse_kind(function, payload)?),
            "disconnect" => Self::Disconnect(if payload.trim().eq_ignore_ascii_case("all") {
                DisconnectTarget::All
            } else {
                DisconnectTarget::Kind(parse_kind(function, payload)?)
            }),
            "send" => Self::Send(payload.to_owned()),
            "logstart" => Self::LogStart(PathBuf::from(required(function, payload)?)),
            "logstop" => Self::LogStop,
            "set_timestamp" => Self::SetTimestamp,
            "set_timeout" => Self::SetTimeout(parse_seconds(function, payload)?),
            "send_log" => Self::SendLog(payload.to_owned()),
            "wait_log" => Self::WaitLog(required(function, payload)?.to_owned()),
            "pause" => Self::Pause(parse_seconds(function, payload)?),
            "get_env" => Self::GetEnv(required(function, payload)?.to_owned()),
            "set_env" => {
                let (key, value) = required(function, payload)?
                    .split_once(char::is_whitespace)
                    .map(|(key, value)| (key, value.trim()))
                    .filter(|(_, value)| !value.is_empty())
                    .ok_or_else(|| EnvelopeError::InvalidPayload {
                        function: function.to_owned(),
                        payload: payload.to_owned(),
                        reason: "expected '<key> <value>'".to_owned(),
                    })?;
                Self::SetEnv {
                    key: key.to_owned(),
                    value: value.to_owned(),
                }
            }
            "stop" => Self::Stop,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    /// Whether the command needs a running transport.
    #[must_use]
    pub fn requires_connection(&self) -> bool {
        matches!(
            self,
            Self::Send(_)
                | Self::LogStart(_)
                | Self::LogStop
                | Self::SetTimestamp
                | Self::SetTimeout(_)
                | Self::SendLog(_)
                | Self::WaitLog(_)
        )
    }

    /// Wire name of the command.
    #[must_use]
    pub fn function(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Send(_) => "send",
            Self::LogStart(_) => "logstart",
            Self::LogStop => "logstop",
            Self::SetTimestamp => "set_timestamp",
            Self::SetTimeout(_) => "set_timeout",
            Self::SendLog(_) => "send_log",
            Self::WaitLog(_) => "wait_log",
            Self::Pause(_) => "pause",
            Self::GetEnv(_) => "get_env",
            Self::SetEnv { .. } => "set_env",
            Self::Stop => "stop",
        }
    }
}

fn required<'a>(function: &str, payload: &'a str) -> Result<&'a str, EnvelopeError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(EnvelopeError::MissingPayload {
            function: function.to_owned(),
        });
    }
    Ok(trimmed)
}

fn parse_kind(function: &str, payload: &str) -> Result<TransportKind, EnvelopeError> {
    payload
        .parse()
        .map_err(|source| EnvelopeError::InvalidKind {
            function: function.to_owned(),
            source,
        })
}

fn parse_seconds(function: &str, payload: &str) -> Result<Duration, EnvelopeError> {
    let invalid = |reason: &str| EnvelopeError::InvalidPayload {
        function: function.to_owned(),
        payload: payload.to_owned(),
        reason: reason.to_owned(),
    };
    let seconds: f64 = required(function, payload)?
        .parse()
        .map_err(|_| invalid("expected a number of seconds"))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid("seconds must be finite and non-negative"))
}

/// Errors raised while decoding control lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The line does not start with `it`.
    #[error("control line does not start with 'it'")]
    MissingPrefix,
    /// The line has no `@` separator.
    #[error("control line has no '@' separator")]
    MissingSeparator,
    /// The function name is empty.
    #[error("control line names no function")]
    EmptyFunction,
    /// A function requiring a payload received none.
    #[error("{function} requires a payload")]
    MissingPayload {
        /// Function name.
        function: String,
    },
    /// A connect or disconnect named an unknown transport.
    #[error("{function}: {source}")]
    InvalidKind {
        /// Function name.
        function: String,
        /// Parse failure.
        #[source]
        source: TransportKindParseError,
    },
    /// The payload could not be interpreted.
    #[error("{function}: invalid payload '{payload}': {reason}")]
    InvalidPayload {
        /// Function name.
        function: String,
        /// Offending payload.
        payload: String,
        /// Why it was rejected.
        reason: String,
    },
}
