//! State common to both transports: flags, log plan, and the reader thread.

use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::SESSION_TARGET;
use super::errors::TransportError;
use super::kind::TransportKind;
use super::log_sink::{LogPlan, LogSink, SharedSink, lock_sink};
use super::reader::{LineSource, LinkFlags, join_bounded, spawn_reader};

/// Grace period `disconnect` gives a reader before escalating.
pub(crate) const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Most of the read timeout a blocked reader is still waited for.
const MAX_READ_ALLOWANCE: Duration = Duration::from_secs(2);

const LOG_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) struct LinkCore {
    kind: TransportKind,
    flags: LinkFlags,
    log: LogPlan,
    echo: bool,
    sink: Option<SharedSink>,
    reader: Option<JoinHandle<()>>,
}

impl LinkCore {
    pub(crate) fn new(kind: TransportKind, timeout: Duration, log: LogPlan, echo: bool) -> Self {
        Self {
            kind,
            flags: LinkFlags::new(timeout),
            log,
            echo,
            sink: None,
            reader: None,
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn flags(&self) -> &LinkFlags {
        &self.flags
    }

    pub(crate) fn log(&self) -> &LogPlan {
        &self.log
    }

    pub(crate) fn replace_log(&mut self, plan: LogPlan) {
        self.log = plan;
    }

    pub(crate) fn open_sink(&mut self, header: &str) -> Result<LogSink, TransportError> {
        self.log.open(header, self.echo)
    }

    /// Marks the link running and hands the source to a new reader thread.
    pub(crate) fn start_reader<S: LineSource>(
        &mut self,
        source: S,
        sink: LogSink,
    ) -> Result<(), TransportError> {
        let sink = Arc::new(Mutex::new(sink));
        self.flags.set_running(true);
        match spawn_reader(self.kind, source, Arc::clone(&sink), self.flags.clone()) {
            Ok(handle) => {
                self.sink = Some(sink);
                self.reader = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.flags.set_running(false);
                Err(error)
            }
        }
    }

    /// Appends operator text to the active log, following the same
    /// timestamp rule as device output.
    pub(crate) fn append_note(&self, text: &str) -> Result<(), TransportError> {
        let sink = self
            .sink
            .as_ref()
            .ok_or(TransportError::NotRunning { kind: self.kind })?;
        lock_sink(sink)
            .write_line(text.as_bytes(), self.flags.timestamp())
            .map_err(|source| TransportError::Log {
                path: self.log.path().to_path_buf(),
                source,
            })
    }

    /// Polls the active log until it contains `text` or the link's timeout
    /// elapses. Returns whether the text was seen.
    pub(crate) fn wait_for_text(&self, text: &str) -> bool {
        let deadline = Instant::now() + self.flags.timeout();
        loop {
            if self.log_contains(text) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(LOG_POLL.min(deadline - now));
        }
    }

    fn log_contains(&self, text: &str) -> bool {
        match fs::read(self.log.path()) {
            Ok(content) => String::from_utf8_lossy(&content).contains(text),
            Err(error) => {
                debug!(
                    target: SESSION_TARGET,
                    link = %self.kind,
                    file = %self.log.path().display(),
                    error = %error,
                    "log not readable yet"
                );
                false
            }
        }
    }

    /// Join limit for a reader that may sit in one timed read: the grace
    /// period plus the read timeout, capped at [`MAX_READ_ALLOWANCE`].
    pub(crate) fn timed_read_join_limit(&self) -> Duration {
        READER_JOIN_TIMEOUT + self.flags.timeout().min(MAX_READ_ALLOWANCE)
    }

    /// Waits up to `limit` for the reader to finish. Returns `false` when the
    /// reader is still alive; the handle is kept so a later call can retry.
    pub(crate) fn join_reader(&mut self, limit: Duration) -> bool {
        let Some(handle) = self.reader.take() else {
            return true;
        };
        match join_bounded(self.kind, handle, limit) {
            Ok(()) => true,
            Err(handle) => {
                self.reader = Some(handle);
                false
            }
        }
    }

    /// Drops a reader that outlived every join attempt.
    pub(crate) fn abandon_reader(&mut self) {
        if self.reader.take().is_some() {
            warn!(
                target: SESSION_TARGET,
                link = %self.kind,
                "reader did not stop within the grace period; detaching"
            );
        }
    }

    /// Removes the log file unless the operator asked to keep it.
    pub(crate) fn discard_log(&self) {
        if self.log.save() {
            return;
        }
        match fs::remove_file(self.log.path()) {
            Ok(()) => debug!(
                target: SESSION_TARGET,
                link = %self.kind,
                file = %self.log.path().display(),
                "scratch log removed"
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: SESSION_TARGET,
                link = %self.kind,
                file = %self.log.path().display(),
                error = %error,
                "failed to remove scratch log"
            ),
        }
    }
}
