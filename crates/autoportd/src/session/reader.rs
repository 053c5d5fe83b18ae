//! Background reader shared by both transports.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::SESSION_TARGET;
use super::errors::TransportError;
use super::kind::TransportKind;
use super::log_sink::{SharedSink, lock_sink};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Line-oriented view over a device handle.
pub(crate) trait LineSource: Send + 'static {
    /// Reads bytes up to and including the next `\n`, appending them to
    /// `buffer`. Returns `Ok(0)` once the device closed the stream. Timeouts
    /// surface as `TimedOut` or `WouldBlock` and leave partial data in place.
    fn read_line(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize>;

    /// Applies a new read timeout. Sources without a timeout ignore it.
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// State shared between a transport and its background threads.
#[derive(Debug, Clone)]
pub(crate) struct LinkFlags {
    running: Arc<AtomicBool>,
    timestamp: Arc<AtomicBool>,
    timeout_ms: Arc<AtomicU64>,
}

impl LinkFlags {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            timestamp: Arc::new(AtomicBool::new(false)),
            timeout_ms: Arc::new(AtomicU64::new(duration_millis(timeout))),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn timestamp(&self) -> bool {
        self.timestamp.load(Ordering::SeqCst)
    }

    pub(crate) fn enable_timestamp(&self) {
        self.timestamp.store(true, Ordering::SeqCst);
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(duration_millis(timeout), Ordering::SeqCst);
    }
}

fn duration_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Starts the reader thread for a freshly opened link.
pub(crate) fn spawn_reader<S: LineSource>(
    kind: TransportKind,
    source: S,
    sink: SharedSink,
    flags: LinkFlags,
) -> Result<thread::JoinHandle<()>, TransportError> {
    thread::Builder::new()
        .name(format!("{kind}-reader"))
        .spawn(move || read_loop(kind, source, sink, &flags))
        .map_err(|source| TransportError::Thread {
            role: "reader",
            source,
        })
}

fn read_loop<S: LineSource>(kind: TransportKind, mut source: S, sink: SharedSink, flags: &LinkFlags) {
    let mut applied = None;
    let mut line = Vec::new();
    while flags.is_running() {
        let timeout = flags.timeout();
        if applied != Some(timeout) {
            if let Err(error) = source.apply_timeout(timeout) {
                warn!(target: SESSION_TARGET, link = %kind, error = %error, "failed to apply read timeout");
            }
            applied = Some(timeout);
        }
        match source.read_line(&mut line) {
            Ok(0) => {
                if !line.is_empty() {
                    record(kind, &sink, &line, flags);
                }
                debug!(target: SESSION_TARGET, link = %kind, "device closed the link");
                break;
            }
            Ok(_) if line.ends_with(b"\n") => {
                record(kind, &sink, &line, flags);
                line.clear();
            }
            Ok(_) => {}
            Err(error) if is_idle(&error) => {}
            Err(error) => {
                warn!(target: SESSION_TARGET, link = %kind, error = %error, "device read failed");
                break;
            }
        }
    }
    flags.set_running(false);
}

fn record(kind: TransportKind, sink: &SharedSink, line: &[u8], flags: &LinkFlags) {
    if let Err(error) = lock_sink(sink).write_line(line, flags.timestamp()) {
        warn!(target: SESSION_TARGET, link = %kind, error = %error, "failed to append device output to log");
    }
}

fn is_idle(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Waits for a background thread for at most `limit`. A thread still running
/// after the deadline is left detached and reported.
pub(crate) fn join_bounded(
    kind: TransportKind,
    handle: thread::JoinHandle<()>,
    limit: Duration,
) -> Result<(), thread::JoinHandle<()>> {
    let deadline = Instant::now() + limit;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        warn!(target: SESSION_TARGET, link = %kind, "link thread panicked");
    }
    Ok(())
}
