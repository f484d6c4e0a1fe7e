use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};

use crate::runner::Signal;
use crate::{CancelToken, GroupError};

/// Lifecycle of a group. Leaves `Running` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Outcome {
    Running = 0,
    Succeeded = 1,
    Failed = 2,
    Cancelled = 3,
}

impl Outcome {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Outcome::Running,
            1 => Outcome::Succeeded,
            2 => Outcome::Failed,
            _ => Outcome::Cancelled,
        }
    }
}

/// State shared between the group and its running tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    outcome: AtomicU8,
    /// Tasks still running, plus one guard held by the group until `join`.
    pending: AtomicUsize,
    /// Some task returned `Cancelled` on its own.
    self_cancelled: AtomicBool,
    /// Written only by the winner of the transition to `Failed`.
    failure: Mutex<Option<GroupError>>,
    /// Wakes a blocked `join` when the group settles without a task
    /// completion to announce it. Dropped by `join` once it stops
    /// waiting for the outcome, so the channel can disconnect.
    waker: Mutex<Option<Sender<Signal>>>,
    pub(crate) token: CancelToken,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self::with_waker(None)
    }

    pub(crate) fn with_waker(waker: Option<Sender<Signal>>) -> Self {
        Self {
            outcome: AtomicU8::new(Outcome::Running as u8),
            pending: AtomicUsize::new(1),
            self_cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
            waker: Mutex::new(waker),
            token: CancelToken::new(),
        }
    }

    pub(crate) fn outcome(&self) -> Outcome {
        Outcome::from_u8(self.outcome.load(Ordering::Acquire))
    }

    fn transition(&self, to: Outcome) -> bool {
        self.outcome
            .compare_exchange(
                Outcome::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record `error` as the cause of the group's failure. Only the first
    /// caller wins; it alone broadcasts cancellation. Losers get their error
    /// back.
    pub(crate) fn fail(&self, error: GroupError) -> Result<(), GroupError> {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.transition(Outcome::Failed) {
            return Err(error);
        }

        *slot = Some(error);
        drop(slot);

        self.token.cancel();
        Ok(())
    }

    /// Running → Cancelled with a cancellation broadcast.
    pub(crate) fn shutdown(&self) -> bool {
        if !self.transition(Outcome::Cancelled) {
            return false;
        }

        self.token.cancel();
        self.wake();
        true
    }

    fn wake(&self) {
        let waker = self.waker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(waker) = waker.as_ref() {
            let _ = waker.send(Signal::Wake);
        }
    }

    pub(crate) fn drop_waker(&self) {
        self.waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn failure(&self) -> Option<GroupError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn mark_self_cancelled(&self) {
        self.self_cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one pending slot. The call that takes the count to zero settles
    /// a still running group as `Succeeded`, or `Cancelled` if some task
    /// bailed out on its own.
    pub(crate) fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let settled = if self.self_cancelled.load(Ordering::Acquire) {
            Outcome::Cancelled
        } else {
            Outcome::Succeeded
        };

        if self.transition(settled) {
            tracing::debug!(outcome = ?settled, "group settled");
            self.wake();
        }
    }
}
