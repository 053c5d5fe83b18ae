use std::io;
use std::sync::{Mutex, PoisonError};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;

/// Source of external termination requests.
///
/// A watcher thread blocks in [`ShutdownSignal::wait`] and turns whatever it
/// receives into a `stop` command. [`ShutdownSignal::release`] unblocks the
/// watcher when the daemon stops for another reason.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until a termination request arrives (`Some(signal)`) or the
    /// signal is released (`None`).
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the request cannot be awaited.
    fn wait(&self) -> Result<Option<i32>, ShutdownError>;

    /// Wakes a pending [`ShutdownSignal::wait`] without a request.
    fn release(&self);
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
pub struct SystemShutdownSignal {
    signals: Mutex<Signals>,
    handle: Handle,
}

impl SystemShutdownSignal {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn new() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        Ok(Self {
            signals: Mutex::new(signals),
            handle,
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<Option<i32>, ShutdownError> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(signals.forever().next())
    }

    fn release(&self) {
        self.handle.close();
    }
}
