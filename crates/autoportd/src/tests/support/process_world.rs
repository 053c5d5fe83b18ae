//! Process supervision test world shared across BDD scenarios.

use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use autoport_config::RuntimePaths;
use serde_json::Value;

use crate::bootstrap::ConfigLoader;
use crate::health::HealthReporter;
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_daemon_with};
use crate::process::{DaemonizeError, Daemonizer, LaunchError, LaunchMode, ShutdownError, ShutdownSignal};

use super::{FailingConfigLoader, RecordingHealthReporter, StepResult, TestConfigLoader, wait_for};

const REPLY_TIMEOUT: Duration = Duration::from_secs(15);
const SIGTERM: i32 = 15;

/// Drives a daemon on a background thread against temporary directories.
pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    last_reply: Option<String>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
            last_reply: None,
        }
    }

    pub fn loader(&self) -> &TestConfigLoader {
        &self.loader
    }

    pub fn reporter(&self) -> &RecordingHealthReporter {
        &self.reporter
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        let plan = self.plan(LaunchMode::Background, self.loader.clone(), self.shutdown.clone());
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        self.wait_for_status("ready")
    }

    /// Runs a second daemon to completion on the calling thread.
    pub fn start_foreground(&mut self) {
        let plan = self.plan(LaunchMode::Foreground, self.loader.clone(), TestShutdownSignal::new());
        self.result = Some(run_daemon_with(plan));
    }

    pub fn start_with_invalid_config(&mut self) {
        let plan = self.plan(LaunchMode::Foreground, FailingConfigLoader, TestShutdownSignal::new());
        self.result = Some(run_daemon_with(plan));
    }

    fn plan<L: ConfigLoader>(
        &self,
        mode: LaunchMode,
        loader: L,
        shutdown: TestShutdownSignal,
    ) -> LaunchPlan<L, TestDaemonizer, TestShutdownSignal> {
        let reporter = Arc::clone(&self.reporter) as Arc<dyn HealthReporter>;
        LaunchPlan {
            process: ProcessControl {
                mode,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: ServiceDeps { loader, reporter },
        }
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        match handle.join() {
            Ok(result) => {
                self.result = Some(result);
                Ok(())
            }
            Err(_) => Err("daemon thread panicked".to_owned()),
        }
    }

    pub fn wait_for_status(&self, expected: &str) -> StepResult {
        if wait_for(|| {
            self.read_health()
                .is_ok_and(|snapshot| snapshot_field(&snapshot, "status") == expected)
        }) {
            Ok(())
        } else {
            Err(format!("daemon never reported {expected}"))
        }
    }

    pub fn paths(&self) -> RuntimePaths {
        let config = self.loader.load().expect("test configuration");
        RuntimePaths::from_config(&config).expect("runtime paths")
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content =
            fs::read_to_string(self.paths().health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    pub fn control_addr(&self) -> Result<SocketAddr, String> {
        let snapshot = self.read_health()?;
        snapshot_field(&snapshot, "control")
            .parse()
            .map_err(|error: std::net::AddrParseError| error.to_string())
    }

    pub fn write_stale_runtime(&self) -> StepResult {
        let paths = self.paths();
        fs::write(paths.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(paths.pid_path(), b"0\n").map_err(|error| error.to_string())
    }

    /// Sends one control line and records everything the daemon writes back
    /// before closing the connection. The daemon only closes once the line
    /// is queued, so consecutive requests are queued in order.
    pub fn request(&mut self, line: &str) -> StepResult {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(Some(REPLY_TIMEOUT))
            .map_err(|error| error.to_string())?;
        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .and_then(|()| stream.shutdown(Shutdown::Write))
            .map_err(|error| error.to_string())?;
        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .map_err(|error| error.to_string())?;
        self.last_reply = Some(reply);
        Ok(())
    }

    /// Writes each line on its own connection, one after another, without
    /// waiting for the daemon to read or answer any of them.
    pub fn fire(&self, lines: &[&str]) -> StepResult {
        let mut clients = Vec::with_capacity(lines.len());
        for line in lines {
            let mut stream = self.connect()?;
            stream
                .write_all(line.as_bytes())
                .and_then(|()| stream.write_all(b"\n"))
                .map_err(|error| error.to_string())?;
            clients.push(stream);
        }
        drop(clients);
        Ok(())
    }

    fn connect(&self) -> Result<TcpStream, String> {
        let addr = self.control_addr()?;
        TcpStream::connect(addr).map_err(|error| error.to_string())
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    pub fn scratch_log(&self, name: &str) -> PathBuf {
        self.loader.log_dir().join(name)
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown.trigger();
            drop(handle.join());
        }
    }
}

fn snapshot_field(snapshot: &Value, field: &str) -> String {
    snapshot
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Records daemonisation requests instead of forking the test runner.
#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Waiting,
    Triggered,
    Released,
}

/// Shutdown signal raised by the test instead of the operating system.
#[derive(Clone)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<SignalState>, Condvar)>,
}

impl TestShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(SignalState::Waiting), Condvar::new())),
        }
    }

    pub fn trigger(&self) {
        self.set(SignalState::Triggered);
    }

    fn set(&self, next: SignalState) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("shutdown mutex poisoned");
        if *state == SignalState::Waiting {
            *state = next;
        }
        cvar.notify_all();
    }
}

impl Default for TestShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<Option<i32>, ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("shutdown mutex poisoned");
        while *state == SignalState::Waiting {
            state = cvar.wait(state).expect("shutdown mutex poisoned during wait");
        }
        Ok((*state == SignalState::Triggered).then_some(SIGTERM))
    }

    fn release(&self) {
        self.set(SignalState::Released);
    }
}
