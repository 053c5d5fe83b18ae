//! The single consumer that applies queued commands to the session.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::health::HealthReporter;
use crate::lifecycle::ShutdownEvent;
use crate::session::{Session, SessionError, TransportKind};

use super::DISPATCH_TARGET;
use super::envelope::{Command, DisconnectTarget};
use super::queue::{CommandReceiver, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Connected(TransportKind),
    Stopped,
}

/// Drains the command queue in submission order.
///
/// The dispatcher is the only code that touches the [`Session`], so two
/// clients racing each other are applied one after the other.
pub(crate) struct Dispatcher {
    session: Session,
    queue: CommandReceiver,
    event: ShutdownEvent,
    reporter: Arc<dyn HealthReporter>,
    state: DispatchState,
}

impl Dispatcher {
    pub(crate) fn new(
        session: Session,
        queue: CommandReceiver,
        event: ShutdownEvent,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            session,
            queue,
            event,
            reporter,
            state: DispatchState::Idle,
        }
    }

    /// Runs the dispatcher on its own thread.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("dispatcher".to_owned())
            .spawn(move || self.run())
    }

    /// Processes jobs until `stop` or until every sender is dropped. Either
    /// way the session is torn down before shutdown is requested.
    pub(crate) fn run(mut self) {
        info!(target: DISPATCH_TARGET, "dispatcher started");
        while let Some(job) = self.queue.recv() {
            if self.execute(job).is_break() {
                break;
            }
        }
        if self.state != DispatchState::Stopped {
            debug!(target: DISPATCH_TARGET, "command queue closed");
            self.stop();
        }
        info!(target: DISPATCH_TARGET, "dispatcher stopped");
    }

    fn execute(&mut self, job: Job) -> ControlFlow<()> {
        let Job { envelope, reply } = job;
        let command = match Command::decode(&envelope) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!(
                    target: DISPATCH_TARGET,
                    function = envelope.function(),
                    "ignoring unknown function"
                );
                return ControlFlow::Continue(());
            }
            Err(error) => {
                self.reporter.command_rejected(&error);
                return ControlFlow::Continue(());
            }
        };

        if command.requires_connection() && !self.session.connect_check() {
            self.reporter.command_skipped(command.function());
            return ControlFlow::Continue(());
        }

        debug!(target: DISPATCH_TARGET, function = command.function(), "executing command");
        let outcome = match command {
            Command::Connect(kind) => self.session.connect(kind),
            Command::Disconnect(DisconnectTarget::Kind(kind)) => {
                self.session.disconnect(kind);
                Ok(())
            }
            Command::Disconnect(DisconnectTarget::All) => {
                self.session.disconnect_all();
                Ok(())
            }
            Command::Send(text) => self.session.send(&text),
            Command::LogStart(path) => self.session.start_log(path),
            Command::LogStop => self.session.stop_log(),
            Command::SetTimestamp => self.session.enable_timestamp(),
            Command::SetTimeout(timeout) => self.session.set_timeout(timeout),
            Command::SendLog(text) => self.session.send_log(&text),
            Command::WaitLog(text) => self.session.wait_log(&text).map(|seen| {
                if seen {
                    info!(target: DISPATCH_TARGET, text = %text, "text appeared in log");
                } else {
                    warn!(target: DISPATCH_TARGET, text = %text, "timed out waiting for text in log");
                }
            }),
            Command::Pause(duration) => {
                debug!(
                    target: DISPATCH_TARGET,
                    millis = duration.as_millis(),
                    "pausing dispatcher"
                );
                thread::sleep(duration);
                Ok(())
            }
            Command::GetEnv(key) => {
                let value = self.session.environment().get(&key).unwrap_or_default();
                match reply {
                    Some(reply) => {
                        if reply.send(value).is_err() {
                            debug!(
                                target: DISPATCH_TARGET,
                                key = %key,
                                "get_env client went away"
                            );
                        }
                    }
                    None => info!(
                        target: DISPATCH_TARGET,
                        key = %key,
                        value = %value,
                        "environment value"
                    ),
                }
                Ok(())
            }
            Command::SetEnv { key, value } => {
                info!(
                    target: DISPATCH_TARGET,
                    key = %key,
                    value = %value,
                    "environment override recorded"
                );
                self.session.environment_mut().set(key, value);
                Ok(())
            }
            Command::Stop => {
                self.stop();
                return ControlFlow::Break(());
            }
        };

        if let Err(error) = outcome {
            match error {
                SessionError::NotConnected => {
                    self.reporter.command_skipped(envelope.function());
                }
                SessionError::Transport(error) => warn!(
                    target: DISPATCH_TARGET,
                    function = envelope.function(),
                    error = %error,
                    "command failed"
                ),
            }
        }
        self.refresh_state();
        ControlFlow::Continue(())
    }

    fn stop(&mut self) {
        self.session.disconnect_all();
        self.transition(DispatchState::Stopped);
        self.event.request();
    }

    fn refresh_state(&mut self) {
        let next = self
            .session
            .active_kind()
            .map_or(DispatchState::Idle, DispatchState::Connected);
        self.transition(next);
    }

    fn transition(&mut self, next: DispatchState) {
        if self.state != next {
            debug!(
                target: DISPATCH_TARGET,
                from = ?self.state,
                to = ?next,
                "dispatcher state changed"
            );
            self.state = next;
        }
    }
}
