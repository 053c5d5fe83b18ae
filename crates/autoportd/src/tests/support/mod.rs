//! Test harness utilities shared by the daemon's unit and behavioural
//! suites.

mod config_loader;
mod fake_shell;
mod process_world;
mod reporter;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use fake_shell::{FakeShell, wait_for};
pub use process_world::ProcessTestWorld;
pub use reporter::{HealthEvent, RecordingHealthReporter};

/// Outcome of a behaviour step.
pub type StepResult = Result<(), String>;

/// A quoted string value from a Gherkin feature file. Escaped `\n`
/// sequences become newlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedString(String);

impl std::str::FromStr for QuotedString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim_matches('"').replace("\\n", "\n")))
    }
}

impl QuotedString {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
