//! Device-shell transport backed by a child process.
//!
//! The shell runs in its own process group so teardown can signal the whole
//! group. Outbound text travels through a channel to a writer thread; a
//! wedged or exited shell therefore never blocks the dispatcher.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use super::SESSION_TARGET;
use super::errors::TransportError;
use super::kind::TransportKind;
use super::link::{LinkCore, READER_JOIN_TIMEOUT};
use super::reader::{LineSource, LinkFlags, join_bounded};

const TERMINATE_GRACE: Duration = Duration::from_secs(1);
const EXIT_POLL: Duration = Duration::from_millis(25);
const WRITER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

struct ShellLines(BufReader<ChildStdout>);

impl LineSource for ShellLines {
    fn read_line(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize> {
        self.0.read_until(b'\n', buffer)
    }

    fn apply_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

struct ShellProcess {
    child: Child,
    queue: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
}

/// Transport driving `<program> [-s <serial>] shell`.
#[derive(Debug)]
pub(crate) struct ShellTransport {
    program: String,
    serial: String,
    core: LinkCore,
    process: Option<ShellProcess>,
}

impl std::fmt::Debug for ShellProcess {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ShellProcess")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

impl ShellTransport {
    pub(crate) fn new(program: String, serial: String, core: LinkCore) -> Self {
        Self {
            program,
            serial,
            core,
            process: None,
        }
    }

    pub(crate) fn core(&self) -> &LinkCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    /// Header written at the top of an operator-requested log.
    pub(crate) fn header(&self) -> String {
        format!(">>>>>>>>>> adb log start, port={}", self.serial)
    }

    /// Human-readable target used in diagnostics.
    pub(crate) fn describe(&self) -> String {
        if self.serial.is_empty() {
            format!("{} shell", self.program)
        } else {
            format!("{} -s {} shell", self.program, self.serial)
        }
    }

    pub(crate) fn is_running(&mut self) -> bool {
        if !self.core.flags().is_running() {
            return false;
        }
        match self.process.as_mut().map(|process| process.child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_)) | Err(_)) | None => false,
        }
    }

    /// Spawns the shell and its reader and writer threads. A running shell
    /// is disconnected first.
    pub(crate) fn start(&mut self) -> Result<(), TransportError> {
        if self.process.is_some() {
            self.stop();
        }
        let header = self.header();
        let sink = self.core.open_sink(&header)?;

        let mut command = Command::new(&self.program);
        if !self.serial.is_empty() {
            command.arg("-s").arg(&self.serial);
        }
        command
            .arg("shell")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .process_group(0);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.core.discard_log();
                return Err(TransportError::Spawn {
                    program: self.program.clone(),
                    source,
                });
            }
        };

        let pipes = child.stdin.take().zip(child.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            terminate_group(&mut child);
            return Err(TransportError::MissingPipe {
                stream: "stdin/stdout",
            });
        };

        let (queue, pending) = mpsc::channel();
        let flags = self.core.flags().clone();
        flags.set_running(true);
        let writer = match thread::Builder::new()
            .name("adb-writer".to_owned())
            .spawn(move || write_loop(stdin, &pending, &flags))
        {
            Ok(handle) => handle,
            Err(source) => {
                self.core.flags().set_running(false);
                terminate_group(&mut child);
                return Err(TransportError::Thread {
                    role: "writer",
                    source,
                });
            }
        };

        let mut process = ShellProcess {
            child,
            queue: Some(queue),
            writer: Some(writer),
        };
        if let Err(error) = self
            .core
            .start_reader(ShellLines(BufReader::new(stdout)), sink)
        {
            drop(process.queue.take());
            terminate_group(&mut process.child);
            return Err(error);
        }
        info!(
            target: SESSION_TARGET,
            pid = process.child.id(),
            command = %self.describe(),
            "device shell started"
        );
        self.process = Some(process);
        Ok(())
    }

    /// Queues `text` plus a newline for the writer thread.
    pub(crate) fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning {
                kind: TransportKind::Shell,
            });
        }
        let queue = self
            .process
            .as_ref()
            .and_then(|process| process.queue.as_ref())
            .ok_or(TransportError::NotRunning {
                kind: TransportKind::Shell,
            })?;
        let mut payload = text.as_bytes().to_vec();
        payload.push(b'\n');
        queue.send(payload).map_err(|_| TransportError::NotRunning {
            kind: TransportKind::Shell,
        })
    }

    /// Stops the shell: closes its stdin, gives the reader a fixed grace
    /// period, then terminates the process group, escalating to `SIGKILL`
    /// when the group ignores `SIGTERM`. Shell reads have no timeout, so the
    /// operator's `set_timeout` never lengthens this. The scratch log is
    /// removed afterwards.
    pub(crate) fn stop(&mut self) {
        self.core.flags().set_running(false);
        if let Some(mut process) = self.process.take() {
            drop(process.queue.take());
            if let Some(writer) = process.writer.take()
                && join_bounded(TransportKind::Shell, writer, WRITER_JOIN_TIMEOUT).is_err()
            {
                debug!(target: SESSION_TARGET, "writer still blocked; terminating shell");
            }
            let reader_done = self.core.join_reader(READER_JOIN_TIMEOUT);
            terminate_group(&mut process.child);
            if !reader_done && !self.core.join_reader(READER_JOIN_TIMEOUT) {
                self.core.abandon_reader();
            }
            info!(
                target: SESSION_TARGET,
                pid = process.child.id(),
                "device shell stopped"
            );
        }
        self.core.discard_log();
    }
}

impl Drop for ShellTransport {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            drop(process.queue.take());
            terminate_group(&mut process.child);
        }
    }
}

fn write_loop(mut stdin: ChildStdin, pending: &mpsc::Receiver<Vec<u8>>, flags: &LinkFlags) {
    for payload in pending {
        let written = stdin.write_all(&payload).and_then(|()| stdin.flush());
        if let Err(error) = written {
            if error.kind() == io::ErrorKind::BrokenPipe {
                warn!(target: SESSION_TARGET, "device shell exited; broken pipe on write");
            } else {
                warn!(target: SESSION_TARGET, error = %error, "failed to write to device shell");
            }
            flags.set_running(false);
            break;
        }
    }
}

/// Signals the child's process group and reaps the child.
fn terminate_group(child: &mut Child) {
    let Ok(raw) = i32::try_from(child.id()) else {
        reap(child);
        return;
    };
    let group = Pid::from_raw(raw);
    signal_group(group, Signal::SIGTERM);
    let deadline = Instant::now() + TERMINATE_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
            Ok(None) | Err(_) => break,
        }
    }
    warn!(
        target: SESSION_TARGET,
        pid = raw,
        "device shell ignored SIGTERM; sending SIGKILL"
    );
    signal_group(group, Signal::SIGKILL);
    reap(child);
}

fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target: SESSION_TARGET,
            pgid = group.as_raw(),
            signal = %signal,
            error = %errno,
            "failed to signal device shell group"
        ),
    }
}

fn reap(child: &mut Child) {
    if let Err(error) = child.kill().and_then(|()| child.wait().map(|_| ()))
        && error.kind() != io::ErrorKind::InvalidInput
    {
        debug!(target: SESSION_TARGET, error = %error, "device shell already reaped");
    }
}
