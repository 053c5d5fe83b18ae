//! Transport kinds selectable through `connect` and `disconnect`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The two link flavours a session can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Device shell spawned as a child process (`adb shell`).
    Shell,
    /// Serial (UART) port.
    Serial,
}

impl TransportKind {
    /// File name of the scratch log used when no `logstart` is active.
    #[must_use]
    pub fn default_log_name(self) -> &'static str {
        match self {
            Self::Shell => "adb.log",
            Self::Serial => "tty.log",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Shell => "adb",
            Self::Serial => "tty",
        };
        formatter.write_str(label)
    }
}

/// Error returned when a payload names no known transport kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported transport kind: {0}")]
pub struct TransportKindParseError(String);

impl TransportKindParseError {
    /// Creates a parse error describing the unsupported value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the offending value.
    #[must_use]
    pub fn value(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for TransportKind {
    type Err = TransportKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "adb" | "shell" => Ok(Self::Shell),
            "tty" | "uart" | "serial" => Ok(Self::Serial),
            other => Err(TransportKindParseError::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("adb", TransportKind::Shell)]
    #[case(" ADB ", TransportKind::Shell)]
    #[case("tty", TransportKind::Serial)]
    #[case("uart", TransportKind::Serial)]
    fn parses_transport_aliases(#[case] input: &str, #[case] expected: TransportKind) {
        assert_eq!(input.parse::<TransportKind>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_kinds() {
        let error = "telnet".parse::<TransportKind>().expect_err("telnet is unsupported");
        assert_eq!(error.value(), "telnet");
    }
}
