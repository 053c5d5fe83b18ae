//! FIFO hand-off between connection threads and the dispatcher.

use std::sync::mpsc::{self, Receiver, Sender};

use thiserror::Error;

use super::envelope::Envelope;

/// One queued envelope, optionally paired with a reply channel.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) envelope: Envelope,
    pub(crate) reply: Option<Sender<String>>,
}

/// Raised when the dispatcher is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("command queue is closed")]
pub struct QueueClosed;

/// Cloneable producer side of the command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    jobs: Sender<Job>,
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct CommandReceiver {
    jobs: Receiver<Job>,
}

/// Creates an unbounded FIFO command queue.
#[must_use]
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (jobs, receiver) = mpsc::channel();
    (CommandSender { jobs }, CommandReceiver { jobs: receiver })
}

impl CommandSender {
    /// Enqueues an envelope without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the dispatcher has exited.
    pub fn submit(&self, envelope: Envelope) -> Result<(), QueueClosed> {
        self.jobs
            .send(Job {
                envelope,
                reply: None,
            })
            .map_err(|_| QueueClosed)
    }

    /// Enqueues an envelope and blocks until the dispatcher answers. The
    /// reply arrives in queue order, after everything submitted earlier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] when the dispatcher exits before answering.
    pub fn request(&self, envelope: Envelope) -> Result<String, QueueClosed> {
        self.submit_request(envelope)?
            .recv()
            .map_err(|_| QueueClosed)
    }

    /// Enqueues an envelope and returns the channel its answer arrives on,
    /// so the caller can wait elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the dispatcher has exited.
    pub fn submit_request(&self, envelope: Envelope) -> Result<Receiver<String>, QueueClosed> {
        let (reply, answer) = mpsc::channel();
        self.jobs
            .send(Job {
                envelope,
                reply: Some(reply),
            })
            .map_err(|_| QueueClosed)?;
        Ok(answer)
    }
}

impl CommandReceiver {
    /// Blocks for the next job; `None` once every sender is dropped.
    pub(crate) fn recv(&self) -> Option<Job> {
        self.jobs.recv().ok()
    }
}
