//! Launching `autoportd` on demand.
//!
//! The pid marker in the runtime directory is the only signal the client
//! trusts: when it is present a daemon is assumed to be running, when it is
//! absent the client spawns one and waits for a fresh `ready` health
//! snapshot before sending its command.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use autoport_config::{Config, RuntimePaths, RuntimePathsError};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding the daemon executable.
pub(crate) const DAEMON_BINARY_ENV: &str = "AUTOPORTD_BIN";
const DEFAULT_DAEMON_BINARY: &str = "autoportd";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors raised while launching the daemon.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error(transparent)]
    RuntimePaths(#[from] RuntimePathsError),
    #[error("failed to spawn autoportd binary '{binary:?}': {source}")]
    LaunchDaemon {
        binary: OsString,
        #[source]
        source: io::Error,
    },
    #[error("daemon exited before reporting ready (status: {exit_status:?})")]
    StartupFailed { exit_status: Option<i32> },
    #[error("daemon reported 'stopping' before reaching ready; check health snapshot at {path:?}")]
    StartupAborted { path: PathBuf },
    #[error("timed out waiting for ready snapshot in {timeout_ms} ms at {health_path:?}")]
    StartupTimeout { health_path: PathBuf, timeout_ms: u128 },
    #[error("failed to monitor daemon launch: {source}")]
    MonitorChild {
        #[source]
        source: io::Error,
    },
    #[error("failed to read health snapshot {path:?}: {source}")]
    ReadHealth {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to report daemon launch: {0}")]
    Progress(#[source] io::Error),
    #[error("failed to read pid file {path:?}: {source}")]
    ReadPid {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Inputs for a daemon launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LaunchContext<'a> {
    pub(crate) config: &'a Config,
    /// Leading configuration flags, `argv[0]` first, forwarded to the daemon.
    pub(crate) config_arguments: &'a [OsString],
    pub(crate) daemon_binary: Option<&'a OsStr>,
}

/// Daemon status reported in the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DaemonStatus {
    Starting,
    Ready,
    Stopping,
}

/// Health snapshot written by the daemon next to its pid marker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct HealthSnapshot {
    pub(crate) status: DaemonStatus,
    pub(crate) pid: u32,
    pub(crate) timestamp: u64,
    #[serde(default)]
    pub(crate) control: Option<String>,
}

/// Outcome of [`ensure_daemon`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DaemonState {
    /// A pid marker was already present.
    Running { pid: Option<u32> },
    /// The daemon was launched and reported ready.
    Started(HealthSnapshot),
}

/// Launches the daemon unless its pid marker already exists, announcing the
/// launch on `progress` first.
pub(crate) fn ensure_daemon<W: Write>(
    context: LaunchContext<'_>,
    progress: &mut W,
) -> Result<DaemonState, LifecycleError> {
    let paths = RuntimePaths::from_config(context.config)?;
    if paths.pid_path().exists() {
        let pid = read_pid(paths.pid_path())?;
        return Ok(DaemonState::Running { pid });
    }
    writeln!(progress, "Waiting for daemon start...").map_err(LifecycleError::Progress)?;
    let started_at = SystemTime::now();
    let mut child = spawn_daemon(context.config_arguments, context.daemon_binary)?;
    wait_for_ready(&paths, &mut child, started_at).map(DaemonState::Started)
}

fn spawn_daemon(
    config_arguments: &[OsString],
    binary_override: Option<&OsStr>,
) -> Result<Child, LifecycleError> {
    let binary = resolve_daemon_binary(binary_override);
    let mut command = Command::new(&binary);
    // Skip argv[0] and forward the configuration flags verbatim.
    command.args(config_arguments.iter().skip(1));
    command
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
        .spawn()
        .map_err(|source| LifecycleError::LaunchDaemon { binary, source })
}

fn resolve_daemon_binary(binary_override: Option<&OsStr>) -> OsString {
    binary_override
        .map(OsString::from)
        .or_else(|| env::var_os(DAEMON_BINARY_ENV))
        .unwrap_or_else(|| OsString::from(DEFAULT_DAEMON_BINARY))
}

/// Polls the health snapshot until the launched daemon reports `ready`.
///
/// A spawned process that exits successfully has daemonised; from then on
/// only the snapshot timestamp identifies a fresh snapshot.
fn wait_for_ready(
    paths: &RuntimePaths,
    child: &mut Child,
    started_at: SystemTime,
) -> Result<HealthSnapshot, LifecycleError> {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    let started_secs = started_at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let expected_pid = child.id();
    let mut daemonized = false;
    while Instant::now() < deadline {
        if let Some(status) = child
            .try_wait()
            .map_err(|source| LifecycleError::MonitorChild { source })?
        {
            if !status.success() {
                return Err(LifecycleError::StartupFailed {
                    exit_status: status.code(),
                });
            }
            daemonized = true;
        }
        if let Some(snapshot) = read_health(paths.health_path())?
            && snapshot.timestamp >= started_secs
            && (daemonized || snapshot.pid == expected_pid)
        {
            match snapshot.status {
                DaemonStatus::Ready => return Ok(snapshot),
                DaemonStatus::Stopping => {
                    return Err(LifecycleError::StartupAborted {
                        path: paths.health_path().to_path_buf(),
                    });
                }
                DaemonStatus::Starting => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(LifecycleError::StartupTimeout {
        health_path: paths.health_path().to_path_buf(),
        timeout_ms: STARTUP_TIMEOUT.as_millis(),
    })
}

/// Reads the snapshot, treating a missing or half-written file as absent.
pub(crate) fn read_health(path: &Path) -> Result<Option<HealthSnapshot>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content).ok()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LifecycleError::ReadHealth {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_pid(path: &Path) -> Result<Option<u32>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LifecycleError::ReadPid {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn config() -> (TempDir, Config) {
        let dir = tempfile::tempdir().expect("runtime dir");
        let config = Config {
            runtime_dir: Some(
                Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path"),
            ),
            ..Config::default()
        };
        (dir, config)
    }

    #[test]
    fn binary_override_wins() {
        let resolved = resolve_daemon_binary(Some(OsStr::new("/custom/autoportd")));
        assert_eq!(resolved, OsString::from("/custom/autoportd"));
    }

    #[test]
    fn missing_binary_reports_launch_failure() {
        let error = spawn_daemon(&[], Some(OsStr::new("/nonexistent/autoportd")))
            .expect_err("spawn must fail");
        match error {
            LifecycleError::LaunchDaemon { binary, .. } => {
                assert_eq!(binary, OsString::from("/nonexistent/autoportd"));
            }
            other => panic!("expected LaunchDaemon, got: {other:?}"),
        }
    }

    #[rstest]
    fn existing_pid_marker_skips_the_launch(config: (TempDir, Config)) {
        let (_dir, config) = config;
        let paths = RuntimePaths::from_config(&config).expect("runtime paths");
        fs::write(paths.pid_path(), b"4242\n").expect("pid marker");
        let context = LaunchContext {
            config: &config,
            config_arguments: &[],
            daemon_binary: Some(OsStr::new("/nonexistent/autoportd")),
        };
        let mut progress = Vec::new();
        assert_eq!(
            ensure_daemon(context, &mut progress).expect("no launch needed"),
            DaemonState::Running { pid: Some(4242) }
        );
        assert!(progress.is_empty());
    }

    #[rstest]
    fn half_written_snapshots_are_ignored(config: (TempDir, Config)) {
        let (_dir, config) = config;
        let paths = RuntimePaths::from_config(&config).expect("runtime paths");
        fs::write(paths.health_path(), b"{\"status\":").expect("partial snapshot");
        assert_eq!(read_health(paths.health_path()).expect("readable"), None);
    }

    #[rstest]
    fn snapshots_carry_the_control_address(config: (TempDir, Config)) {
        let (_dir, config) = config;
        let paths = RuntimePaths::from_config(&config).expect("runtime paths");
        fs::write(
            paths.health_path(),
            br#"{"status":"ready","pid":7,"timestamp":1,"control":"127.0.0.1:18890"}"#,
        )
        .expect("snapshot");
        let snapshot = read_health(paths.health_path())
            .expect("readable")
            .expect("snapshot present");
        assert_eq!(snapshot.status, DaemonStatus::Ready);
        assert_eq!(snapshot.control.as_deref(), Some("127.0.0.1:18890"));
    }
}
