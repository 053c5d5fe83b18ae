//! Per-connection handling of control lines.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::dispatch::{CommandSender, Envelope};
use crate::lifecycle::ShutdownEvent;

use super::CONTROL_TARGET;

/// Upper bound on a single control line.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// How long a connection may stay silent before its bytes are taken as the
/// whole request.
const READ_POLL: Duration = Duration::from_millis(250);

/// Longest a client may take to deliver its line, however slowly it trickles.
const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Reply sent once a `stop` has fully torn the daemon down.
const STOP_REPLY: &[u8] = b"Stop listening\n";

/// Handles accepted control connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Reads and queues the connection's request on the accepting thread, so
    /// requests reach the dispatcher in accept order. Returns the reply the
    /// client is still owed, to be finished off the accepting thread.
    /// Implementations should avoid panicking.
    fn handle(&self, stream: TcpStream) -> Option<PendingReply>;
}

/// A queued request whose client waits for an answer.
#[derive(Debug)]
pub(crate) struct PendingReply {
    stream: TcpStream,
    wait: ReplyWait,
}

#[derive(Debug)]
enum ReplyWait {
    Value(Receiver<String>),
    Stop {
        event: ShutdownEvent,
        timeout: Duration,
    },
}

impl PendingReply {
    /// Blocks until the answer is available and writes it to the client.
    pub(crate) fn finish(self) {
        if let Err(error) = self.deliver() {
            warn!(
                target: CONTROL_TARGET,
                error = %error,
                "failed to answer control client"
            );
        }
    }

    fn deliver(self) -> io::Result<()> {
        let Self { mut stream, wait } = self;
        match wait {
            ReplyWait::Value(answer) => {
                let Ok(value) = answer.recv() else {
                    warn!(target: CONTROL_TARGET, "get_env not answered");
                    return Ok(());
                };
                stream.write_all(value.as_bytes())?;
                stream.write_all(b"\n")?;
            }
            ReplyWait::Stop { event, timeout } => {
                if !event.wait_completed(timeout) {
                    warn!(
                        target: CONTROL_TARGET,
                        timeout_ms = timeout.as_millis(),
                        "shutdown did not complete in time"
                    );
                    return Ok(());
                }
                stream.write_all(STOP_REPLY)?;
            }
        }
        stream.flush()
    }
}

/// Reads one envelope per connection and forwards it to the dispatcher.
///
/// `get_env` and `stop` hold the connection open for an answer; everything
/// else is fire-and-forget.
#[derive(Debug, Clone)]
pub(crate) struct ControlHandler {
    commands: CommandSender,
    event: ShutdownEvent,
    stop_timeout: Duration,
}

impl ControlHandler {
    pub(crate) fn new(commands: CommandSender, event: ShutdownEvent, stop_timeout: Duration) -> Self {
        Self {
            commands,
            event,
            stop_timeout,
        }
    }

    fn serve(&self, mut stream: TcpStream) -> io::Result<Option<PendingReply>> {
        stream.set_read_timeout(Some(READ_POLL))?;
        let Some(bytes) = read_request_line(&mut stream)? else {
            debug!(target: CONTROL_TARGET, "client disconnected without request");
            return Ok(None);
        };
        let line = String::from_utf8_lossy(&bytes);
        let envelope = match Envelope::parse(&line) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(target: CONTROL_TARGET, error = %error, "discarding control line");
                return Ok(None);
            }
        };

        let wait = match envelope.function() {
            "stop" => {
                if self.commands.submit(Envelope::stop()).is_err() {
                    debug!(target: CONTROL_TARGET, "dispatcher already stopped");
                }
                ReplyWait::Stop {
                    event: self.event.clone(),
                    timeout: self.stop_timeout,
                }
            }
            "get_env" => match self.commands.submit_request(envelope) {
                Ok(answer) => ReplyWait::Value(answer),
                Err(error) => {
                    warn!(target: CONTROL_TARGET, error = %error, "get_env not answered");
                    return Ok(None);
                }
            },
            _ => {
                if let Err(error) = self.commands.submit(envelope) {
                    warn!(target: CONTROL_TARGET, error = %error, "command dropped");
                }
                return Ok(None);
            }
        };
        Ok(Some(PendingReply { stream, wait }))
    }
}

impl ConnectionHandler for ControlHandler {
    fn handle(&self, stream: TcpStream) -> Option<PendingReply> {
        self.serve(stream).unwrap_or_else(|error| {
            warn!(
                target: CONTROL_TARGET,
                error = %error,
                "connection handler error"
            );
            None
        })
    }
}

/// Reads up to the first newline. A connection that falls silent, or runs
/// past [`READ_DEADLINE`], hands over what it sent so far, matching clients
/// that never terminate their line.
fn read_request_line(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let deadline = Instant::now() + READ_DEADLINE;
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let bytes_read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                0
            }
            Err(error) => return Err(error),
        };

        if bytes_read == 0 {
            return Ok((!buffer.is_empty()).then_some(buffer));
        }

        let read = &chunk[..bytes_read];
        if let Some(pos) = read.iter().position(|byte| *byte == b'\n') {
            buffer.extend_from_slice(&read[..=pos]);
            enforce_request_limit(buffer.len())?;
            return Ok(Some(buffer));
        }
        buffer.extend_from_slice(read);
        enforce_request_limit(buffer.len())?;
        if Instant::now() >= deadline {
            return Ok(Some(buffer));
        }
    }
}

fn enforce_request_limit(size: usize) -> io::Result<()> {
    if size > MAX_REQUEST_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request exceeds maximum size",
        ));
    }
    Ok(())
}
