//! Supervises daemon launch sequencing and runtime orchestration.

use std::env;
use std::path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use autoport_config::{Config, RuntimePaths};

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::control::{ControlHandler, ControlListener, ListenerHandle};
use crate::dispatch::{CommandSender, Dispatcher, Envelope, command_channel};
use crate::health::HealthReporter;
use crate::lifecycle::ShutdownEvent;
use crate::session::{DeviceDefaults, LinkOptions, Session};

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal and echo device output to stdout.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }

    fn echoes_output(self) -> bool {
        matches!(self, Self::Foreground)
    }
}

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the daemon runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when the daemon cannot start or does not shut
/// down cleanly.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new()?,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
        },
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
///
/// Shutdown always runs on the dispatcher: a client `stop` or an OS signal
/// becomes a queued `stop`, the dispatcher tears the session down and
/// requests shutdown, and only then are the runtime files removed and the
/// waiting `stop` client answered.
pub(crate) fn run_daemon_with<L, D, S>(plan: LaunchPlan<L, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: ShutdownSignal + 'static,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let ServiceDeps { loader, reporter } = services;

    info!(
        target: PROCESS_TARGET,
        ?mode,
        "starting daemon runtime"
    );
    let mut config = loader.load()?;
    anchor_log_dir(&mut config)?;
    let runtime_paths = RuntimePaths::from_config(&config)?;
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let daemon = bootstrap_with(&StaticConfigLoader::new(config), reporter)?;
    let listener = ControlListener::bind(
        &daemon.config().control_host,
        daemon.config().control_port,
    )?;
    guard.record_control_addr(listener.local_addr());

    let mut runtime = Runtime::start(&daemon, mode, Arc::new(shutdown))?;
    let served = runtime.serve(listener, &guard);
    let stopped = runtime.stop_services();
    drop(guard);
    let joined = runtime.finish();
    served.and(stopped).and(joined)?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}

/// Makes the scratch log directory absolute before daemonising changes the
/// working directory.
fn anchor_log_dir(config: &mut Config) -> Result<(), LaunchError> {
    let absolute =
        path::absolute(config.log_dir.as_std_path()).map_err(|source| LaunchError::LogDirectory {
            path: config.log_dir.as_std_path().to_path_buf(),
            source,
        })?;
    config.log_dir = Utf8PathBuf::from_path_buf(absolute)
        .map_err(|path| LaunchError::NonUtf8LogDirectory { path })?;
    Ok(())
}

/// Threads that outlive a single step of the launch sequence.
struct Runtime<S> {
    commands: CommandSender,
    event: ShutdownEvent,
    shutdown: Arc<S>,
    dispatcher: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    listener: Option<ListenerHandle>,
}

impl<S> Runtime<S>
where
    S: ShutdownSignal + 'static,
{
    fn start(daemon: &Daemon, mode: LaunchMode, shutdown: Arc<S>) -> Result<Self, LaunchError> {
        let config = daemon.config();
        let session = Session::new(
            LinkOptions::from_config(config, mode.echoes_output()),
            DeviceDefaults::from_config(config),
            daemon.reporter(),
        );
        let (commands, queue) = command_channel();
        let event = ShutdownEvent::new();
        let dispatcher = Dispatcher::new(session, queue, event.clone(), daemon.reporter())
            .spawn()
            .map_err(|source| LaunchError::ThreadSpawn {
                role: "dispatcher",
                source,
            })?;
        Ok(Self {
            commands,
            event,
            shutdown,
            dispatcher: Some(dispatcher),
            watcher: None,
            listener: None,
        })
    }

    /// Accepts clients until shutdown is requested.
    fn serve(&mut self, listener: ControlListener, guard: &ProcessGuard) -> Result<(), LaunchError> {
        let handler = Arc::new(ControlHandler::new(
            self.commands.clone(),
            self.event.clone(),
            SHUTDOWN_TIMEOUT,
        ));
        self.listener = Some(listener.start(handler)?);
        self.watcher = Some(spawn_signal_watcher(
            Arc::clone(&self.shutdown),
            self.commands.clone(),
        )?);
        guard.write_health(HealthState::Ready)?;
        info!(target: PROCESS_TARGET, "daemon ready");
        self.event.wait_requested();
        guard.write_health(HealthState::Stopping)
    }

    /// Stops accepting clients, makes sure the session is torn down and
    /// joins the dispatcher and the signal watcher.
    fn stop_services(&mut self) -> Result<(), LaunchError> {
        if let Some(listener) = &self.listener {
            listener.shutdown();
        }
        if !self.event.is_requested() && self.commands.submit(Envelope::stop()).is_err() {
            debug!(target: PROCESS_TARGET, "dispatcher already gone");
        }
        let dispatcher = match self.dispatcher.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(LaunchError::DispatcherPanic),
            _ => Ok(()),
        };
        self.shutdown.release();
        if let Some(watcher) = self.watcher.take()
            && watcher.join().is_err()
        {
            warn!(target: PROCESS_TARGET, "signal watcher panicked");
        }
        dispatcher
    }

    /// Releases `stop` clients and joins the listener with its connections.
    fn finish(mut self) -> Result<(), LaunchError> {
        self.event.complete();
        match self.listener.take() {
            Some(listener) => listener.join().map_err(LaunchError::from),
            None => Ok(()),
        }
    }
}

fn spawn_signal_watcher<S>(
    shutdown: Arc<S>,
    commands: CommandSender,
) -> Result<JoinHandle<()>, LaunchError>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name("signal-watcher".to_owned())
        .spawn(move || match shutdown.wait() {
            Ok(Some(signal)) => {
                info!(
                    target: PROCESS_TARGET,
                    signal,
                    "shutdown signal received"
                );
                if commands.submit(Envelope::stop()).is_err() {
                    debug!(target: PROCESS_TARGET, "dispatcher already gone");
                }
            }
            Ok(None) => debug!(target: PROCESS_TARGET, "signal watcher released"),
            Err(error) => warn!(
                target: PROCESS_TARGET,
                error = %error,
                "failed to await shutdown signal"
            ),
        })
        .map_err(|source| LaunchError::ThreadSpawn {
            role: "signal watcher",
            source,
        })
}
