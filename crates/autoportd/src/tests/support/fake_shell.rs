//! A stand-in for `adb` that echoes stdin back and counts its launches.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const LAUNCH_RECORD: &str = "#!/bin/sh\necho launched >> \"$(dirname \"$0\")/launches\"\n";
const ECHO_BODY: &str = "exec cat\n";
const SILENT_BODY: &str = "exec sleep 60\n";
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Executable script in a private directory. Every argument is ignored, so
/// `fake-adb -s serial shell` behaves like `cat`.
pub struct FakeShell {
    dir: TempDir,
    program: PathBuf,
}

impl FakeShell {
    #[must_use]
    pub fn new() -> Self {
        Self::with_body(ECHO_BODY)
    }

    /// A shell that ignores its stdin and prints nothing, like a device busy
    /// with a long-running command.
    #[must_use]
    pub fn silent() -> Self {
        Self::with_body(SILENT_BODY)
    }

    fn with_body(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("fake shell dir");
        let program = dir.path().join("fake-adb");
        fs::write(&program, format!("{LAUNCH_RECORD}{body}")).expect("write fake shell");
        #[cfg(unix)]
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755))
            .expect("make fake shell executable");
        Self { dir, program }
    }

    /// Program path as passed to the shell transport.
    #[must_use]
    pub fn program(&self) -> String {
        self.program.display().to_string()
    }

    /// Scratch directory, also usable for logs.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// How many times the script has been started.
    #[must_use]
    pub fn launches(&self) -> usize {
        fs::read_to_string(self.dir.path().join("launches"))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Polls `log` until it contains `needle`.
    #[must_use]
    pub fn wait_for_log(&self, log: &Path, needle: &str) -> bool {
        wait_for(|| {
            fs::read_to_string(log)
                .map(|content| content.contains(needle))
                .unwrap_or(false)
        })
    }
}

impl Default for FakeShell {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds or the wait budget runs out.
#[must_use]
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}
