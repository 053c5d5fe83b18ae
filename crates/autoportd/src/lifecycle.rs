//! Shutdown event shared by the dispatcher, the supervisor and clients
//! waiting on `stop`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Running,
    Requested,
    Completed,
}

/// Two-step shutdown flag.
///
/// The dispatcher marks shutdown *requested* once the session is torn down.
/// The supervisor marks it *completed* after the runtime files are gone,
/// which releases clients blocked on `stop`.
#[derive(Debug, Clone)]
pub struct ShutdownEvent {
    inner: Arc<(Mutex<Phase>, Condvar)>,
}

impl Default for ShutdownEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownEvent {
    /// Creates an event in the running phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(Phase::Running), Condvar::new())),
        }
    }

    /// Marks shutdown as requested.
    pub fn request(&self) {
        self.advance(Phase::Requested);
    }

    /// Marks shutdown as completed.
    pub fn complete(&self) {
        self.advance(Phase::Completed);
    }

    /// Whether shutdown has been requested or completed.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.lock() >= Phase::Requested
    }

    /// Blocks until shutdown is requested.
    pub fn wait_requested(&self) {
        let (_, condvar) = &*self.inner;
        let mut phase = self.lock();
        while *phase < Phase::Requested {
            phase = condvar
                .wait(phase)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until shutdown completes or `timeout` elapses. Returns whether
    /// it completed.
    #[must_use]
    pub fn wait_completed(&self, timeout: Duration) -> bool {
        let (_, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut phase = self.lock();
        while *phase < Phase::Completed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            phase = condvar
                .wait_timeout(phase, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn advance(&self, next: Phase) {
        let (_, condvar) = &*self.inner;
        let mut phase = self.lock();
        if *phase < next {
            *phase = next;
        }
        condvar.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
