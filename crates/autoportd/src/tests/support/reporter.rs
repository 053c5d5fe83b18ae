//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use autoport_config::Config;

use crate::bootstrap::BootstrapError;
use crate::dispatch::EnvelopeError;
use crate::health::HealthReporter;
use crate::session::{TransportError, TransportKind};

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    TransportConnected(TransportKind),
    TransportClosed(TransportKind),
    TransportFailed(TransportKind),
    CommandSkipped(String),
    CommandRejected(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Number of recorded events equal to `event`.
    #[must_use]
    pub fn count(&self, event: &HealthEvent) -> usize {
        self.events().iter().filter(|seen| *seen == event).count()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn transport_connected(&self, kind: TransportKind, _target: &str) {
        self.record(HealthEvent::TransportConnected(kind));
    }

    fn transport_closed(&self, kind: TransportKind) {
        self.record(HealthEvent::TransportClosed(kind));
    }

    fn transport_failed(&self, kind: TransportKind, _error: &TransportError) {
        self.record(HealthEvent::TransportFailed(kind));
    }

    fn command_skipped(&self, function: &str) {
        self.record(HealthEvent::CommandSkipped(function.to_owned()));
    }

    fn command_rejected(&self, error: &EnvelopeError) {
        self.record(HealthEvent::CommandRejected(error.to_string()));
    }
}
