//! Harness for driving the client against a fake control socket.
//!
//! The fake daemon accepts a single connection, records the envelope it
//! receives and answers `get_env` and `stop` the way `autoportd` does.

use std::cell::RefCell;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use autoport_config::{Config, RuntimePaths};
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;

use crate::{AppError, ConfigLoader, IoStreams, run_with_loader};

/// Reply the fake daemon gives to every `get_env`.
pub(super) const FAKE_ENV_VALUE: &str = "emulator-5554";

const MISSING_DAEMON_BINARY: &str = "/nonexistent/autoportd";

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

pub(super) struct TestWorld {
    pub config: Config,
    _runtime: TempDir,
    pub daemon: Option<FakeDaemon>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<ExitCode>,
    pub requests: Vec<String>,
}

impl TestWorld {
    fn new() -> Result<Self> {
        let runtime = tempfile::tempdir().context("runtime dir")?;
        let runtime_dir = Utf8PathBuf::from_path_buf(runtime.path().to_path_buf())
            .map_err(|path| anyhow!("non-UTF-8 temp dir {}", path.display()))?;
        let config = Config {
            runtime_dir: Some(runtime_dir),
            ..Config::default()
        };
        Ok(Self {
            config,
            _runtime: runtime,
            daemon: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            requests: Vec::new(),
        })
    }

    pub fn start_daemon(&mut self) -> Result<()> {
        let daemon = FakeDaemon::spawn()?;
        self.config.control_host = String::from("127.0.0.1");
        self.config.control_port = daemon.port();
        self.daemon = Some(daemon);
        Ok(())
    }

    /// Points the client at a port nothing listens on.
    pub fn configure_closed_port(&mut self) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind free port")?;
        self.config.control_host = String::from("127.0.0.1");
        self.config.control_port = listener.local_addr().context("free port addr")?.port();
        drop(listener);
        Ok(())
    }

    pub fn write_pid_marker(&self, pid: u32) -> Result<()> {
        let paths = RuntimePaths::from_config(&self.config).context("runtime paths")?;
        fs::write(paths.pid_path(), format!("{pid}\n")).context("write pid marker")
    }

    pub fn run(&mut self, command: &str) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        self.requests.clear();
        let args = Self::build_args(command);
        let loader = StaticConfigLoader::new(self.config.clone());
        let mut io = IoStreams::new(&mut self.stdout, &mut self.stderr);
        let exit = run_with_loader(
            args,
            &mut io,
            &loader,
            Some(OsStr::new(MISSING_DAEMON_BINARY)),
        );
        self.exit_code = Some(exit);
        if let Some(mut daemon) = self.daemon.take() {
            self.requests = daemon.take_requests()?;
        }
        Ok(())
    }

    fn build_args(command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("autoport")];
        args.extend(
            command
                .split_whitespace()
                .map(|token| OsString::from(token.trim_matches('"'))),
        );
        args
    }

    pub fn stdout_text(&self) -> Result<String> {
        decode_utf8(self.stdout.clone(), "stdout")
    }

    pub fn stderr_text(&self) -> Result<String> {
        decode_utf8(self.stderr.clone(), "stderr")
    }

    pub fn assert_success(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(exit == ExitCode::SUCCESS, "expected success, got {exit:?}");
        Ok(())
    }

    pub fn assert_failure(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == ExitCode::FAILURE,
            "expected failure exit code, got {exit:?}"
        );
        Ok(())
    }

    pub fn assert_single_request(&self, expected: &str) -> Result<()> {
        ensure!(
            self.requests.len() == 1,
            "expected single request but found {:?}",
            self.requests
        );
        let actual = self.requests.first().context("request missing")?;
        ensure!(
            actual == expected,
            "request mismatch: expected {expected:?}, got {actual:?}"
        );
        Ok(())
    }

    pub fn assert_no_requests(&self) -> Result<()> {
        ensure!(
            self.requests.is_empty(),
            "expected no daemon requests but found {:?}",
            self.requests
        );
        Ok(())
    }

    pub fn working_dir() -> Result<PathBuf> {
        std::env::current_dir().context("current dir")
    }
}

pub(super) struct FakeDaemon {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    result: Arc<Mutex<Option<Result<()>>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeDaemon {
    pub fn spawn() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake daemon")?;
        listener
            .set_nonblocking(true)
            .context("fake daemon nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let result: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
        let requests_clone = Arc::clone(&requests);
        let result_clone = Arc::clone(&result);
        let handle = thread::spawn(move || {
            let outcome = Self::serve_client(&listener, &requests_clone);
            if let Ok(mut guard) = result_clone.lock() {
                *guard = Some(outcome);
            }
        });
        Ok(Self {
            port,
            requests,
            result,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn take_requests(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake daemon thread panicked"))?;
        }
        if let Some(outcome) = self
            .result
            .lock()
            .map_err(|error| anyhow!("lock fake daemon result: {error}"))?
            .take()
        {
            outcome.context("fake daemon failed")?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }

    fn serve_client(listener: &TcpListener, requests: &Mutex<Vec<String>>) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match listener.accept() {
                Ok((stream, _)) => return Self::answer(stream, requests),
                Err(ref error)
                    if error.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline =>
                {
                    thread::sleep(Duration::from_millis(10));
                }
                // The client gave up before connecting.
                Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => return Err(error).context("accept connection"),
            }
        }
    }

    fn answer(mut stream: TcpStream, requests: &Mutex<Vec<String>>) -> Result<()> {
        stream
            .set_nonblocking(false)
            .context("blocking fake daemon stream")?;
        let mut line = String::new();
        BufReader::new(stream.try_clone().context("clone stream")?)
            .read_line(&mut line)
            .context("read control line")?;
        let reply = if line.starts_with("itget_env@") {
            Some(format!("{FAKE_ENV_VALUE}\n"))
        } else if line.starts_with("itstop@") {
            Some(String::from("Stop listening\n"))
        } else {
            None
        };
        requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?
            .push(line);
        if let Some(reply) = reply {
            stream
                .write_all(reply.as_bytes())
                .context("write fake reply")?;
        }
        Ok(())
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            eprintln!("fake daemon thread panicked");
        }
    }
}

pub(super) fn decode_utf8(buffer: Vec<u8>, label: &str) -> Result<String> {
    String::from_utf8(buffer).with_context(|| format!("{label} utf8"))
}

#[fixture]
pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new().expect("test world"))
}
