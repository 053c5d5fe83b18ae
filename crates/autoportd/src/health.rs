//! Structured health reporting for daemon lifecycle and session events.

use std::sync::Arc;

use autoport_config::Config;

use crate::bootstrap::BootstrapError;
use crate::dispatch::EnvelopeError;
use crate::session::{TransportError, TransportKind};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a transport opened its device.
    fn transport_connected(&self, kind: TransportKind, target: &str);

    /// Invoked after a transport was torn down.
    fn transport_closed(&self, kind: TransportKind);

    /// Invoked when a transport failed to open or lost its device.
    fn transport_failed(&self, kind: TransportKind, error: &TransportError);

    /// Invoked when a command needing a connected transport arrives while
    /// none is running.
    fn command_skipped(&self, function: &str);

    /// Invoked when a command carries a payload the daemon cannot use.
    fn command_rejected(&self, error: &EnvelopeError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn transport_connected(&self, kind: TransportKind, target: &str) {
        (**self).transport_connected(kind, target);
    }

    fn transport_closed(&self, kind: TransportKind) {
        (**self).transport_closed(kind);
    }

    fn transport_failed(&self, kind: TransportKind, error: &TransportError) {
        (**self).transport_failed(kind, error);
    }

    fn command_skipped(&self, function: &str) {
        (**self).command_skipped(function);
    }

    fn command_rejected(&self, error: &EnvelopeError) {
        (**self).command_rejected(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            control_host = %config.control_host,
            control_port = config.control_port,
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn transport_connected(&self, kind: TransportKind, target: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "transport_connected",
            link = %kind,
            device = target,
            "transport connected"
        );
    }

    fn transport_closed(&self, kind: TransportKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "transport_closed",
            link = %kind,
            "transport closed"
        );
    }

    fn transport_failed(&self, kind: TransportKind, error: &TransportError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "transport_failed",
            link = %kind,
            error = %error,
            "transport failed"
        );
    }

    fn command_skipped(&self, function: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "command_skipped",
            function,
            "no transport connected; did you run connect first?"
        );
    }

    fn command_rejected(&self, error: &EnvelopeError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "command_rejected",
            error = %error,
            "command payload rejected"
        );
    }
}
