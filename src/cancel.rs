use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::Cancelled;

/// Cooperative cancellation signal shared by every task of a group.
///
/// Cancelling never stops a task by force. Tasks are expected to call
/// [`CancelToken::check`] at convenient points, or to block through
/// [`CancelToken::sleep`], which wakes up as soon as the token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn cancel(&self) -> bool {
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !self.inner.flag.swap(true, Ordering::AcqRel);
        self.inner.condvar.notify_all();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the signal has been raised.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `Err(Cancelled)` if the
    /// token gets cancelled in the meantime.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_cancelled() {
                return Err(Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            guard = self
                .inner
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
