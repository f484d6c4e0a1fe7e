use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use tracing::Span;

use crate::diagnostics::{TaskExecution, TaskStatus};
use crate::state::Shared;
use crate::{CancelToken, Cancelled, GroupError, Scheduler, TaskCause, TaskId};

/// A type-erased, thread-safe task result.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

pub(crate) type Work = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<Dynamic> + Send>;

/// Everything a running task gets to know about itself and its group.
///
/// Passed explicitly to every unit of work.
pub struct TaskContext {
    id: TaskId,
    name: Arc<str>,
    token: CancelToken,
    span: Span,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cancellation token shared by the whole group.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Bail out with `?` once the group is being cancelled.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        self.token.check()
    }

    /// Sleep that wakes up early on cancellation.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.token.sleep(duration)
    }
}

/// Message sent from a finished task back to `join`.
pub(crate) struct Completion {
    pub(crate) id: TaskId,
    pub(crate) value: Option<Dynamic>,
    pub(crate) execution: TaskExecution,
}

/// Everything `join` waits on.
pub(crate) enum Signal {
    Completion(Completion),
    /// The group was shut down from outside, re-check its outcome.
    Wake,
}

pub(crate) struct Job {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) work: Work,
    pub(crate) shared: Arc<Shared>,
    pub(crate) sender: Sender<Signal>,
    pub(crate) span: Span,
}

/// Thread handles kept so finished threads can be reaped after `join`.
pub(crate) type Threads = Vec<std::thread::JoinHandle<()>>;

pub(crate) fn spawn(
    scheduler: &Scheduler,
    group: &str,
    job: Job,
    threads: &mut Threads,
) -> Result<(), GroupError> {
    match scheduler {
        Scheduler::Thread => {
            let handle = std::thread::Builder::new()
                .name(format!("{group}-{}", job.id.index()))
                .spawn(move || execute(job))?;
            threads.push(handle);
        }
        #[cfg(feature = "rayon")]
        Scheduler::Pool(pool) => pool.spawn(move || execute(job)),
    }

    Ok(())
}

fn execute(job: Job) {
    let Job {
        id,
        name,
        work,
        shared,
        sender,
        span,
    } = job;

    let _enter = span.enter();
    let context = TaskContext {
        id,
        name: name.clone(),
        token: shared.token.clone(),
        span: span.clone(),
    };

    let start = Instant::now();

    if shared.token.is_cancelled() {
        tracing::debug!("group ended before the task started, skipping");
        finish(&shared, &sender, id, name, None, start, TaskStatus::Skipped);
        return;
    }

    // The closure only touches its own captures and the context, a panic
    // inside it can't leave the group's state half-written.
    let result = catch_unwind(AssertUnwindSafe(|| work(&context)));

    let (value, status) = match result {
        Ok(Ok(value)) => (Some(value), TaskStatus::Succeeded),
        Ok(Err(err)) if err.is::<Cancelled>() => {
            if shared.token.is_cancelled() {
                tracing::debug!("stopped after cancellation");
            } else {
                tracing::debug!("cancelled itself");
                shared.mark_self_cancelled();
            }
            (None, TaskStatus::Cancelled)
        }
        Ok(Err(err)) => {
            report(&shared, id, &name, err);
            (None, TaskStatus::Failed)
        }
        Err(panic) => {
            report(&shared, id, &name, anyhow::anyhow!(panic_message(panic)));
            (None, TaskStatus::Panicked)
        }
    };

    tracing::debug!(?status, duration = ?start.elapsed(), "task finished");
    finish(&shared, &sender, id, name, value, start, status);
}

fn finish(
    shared: &Shared,
    sender: &Sender<Signal>,
    id: TaskId,
    name: Arc<str>,
    value: Option<Dynamic>,
    start: Instant,
    status: TaskStatus,
) {
    // Receiver is gone if `join` already gave up on this task.
    let _ = sender.send(Signal::Completion(Completion {
        id,
        value,
        execution: TaskExecution {
            name,
            start,
            duration: start.elapsed(),
            status,
        },
    }));

    shared.complete_one();
}

fn report(shared: &Shared, id: TaskId, name: &Arc<str>, err: anyhow::Error) {
    let error = GroupError::TaskFailure {
        id,
        name: name.clone(),
        cause: TaskCause::new(err),
    };

    match shared.fail(error) {
        Ok(()) => tracing::debug!("first failure, cancelling siblings"),
        Err(lost) => tracing::warn!("discarding failure after the group already ended: {lost}"),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}
