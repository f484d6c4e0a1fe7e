use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::diagnostics::{Diagnostics, TaskExecution, TaskStatus};
use crate::runner::{self, Completion, Dynamic, Job, Signal, TaskContext, Threads};
use crate::state::Shared;
use crate::{GroupConfig, GroupError, Handle, Outcome, Scheduler, TaskGroupBuilder, TaskId};

static NEXT_GROUP: AtomicU64 = AtomicU64::new(0);

/// Runs a fixed batch of tasks concurrently as a single unit.
///
/// A group succeeds only if every task it forked succeeds. The first task to
/// fail settles the group as failed and signals every other task to cancel;
/// any later failure is logged and dropped. Cancellation is cooperative, see
/// [`TaskContext::checkpoint`] and [`TaskContext::sleep`].
///
/// The group is single use: fork the batch, [`join`](TaskGroup::join), read
/// the results, drop it. Dropping a group that was never joined cancels its
/// tasks.
///
/// # Example
///
/// ```rust
/// use taskgroup::TaskGroup;
///
/// let mut group = TaskGroup::new();
/// let a = group.fork(|_| Ok(1)).unwrap();
/// let b = group.fork(|_| Ok("two")).unwrap();
///
/// group.join().unwrap();
/// assert_eq!(*group.result_of(a).unwrap(), 1);
/// assert_eq!(*group.result_of(b).unwrap(), "two");
/// ```
#[derive(Debug)]
pub struct TaskGroup {
    id: u64,
    config: GroupConfig,
    scheduler: Scheduler,
    shared: Arc<Shared>,
    sender: Option<Sender<Signal>>,
    receiver: Receiver<Signal>,
    threads: Threads,
    forked: u32,
    /// Forks that were handed to the scheduler.
    scheduled: u32,
    joined: bool,
    results: HashMap<TaskId, Dynamic>,
    diagnostics: Diagnostics,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::from_parts(GroupConfig::default(), Scheduler::default())
    }

    pub fn builder() -> TaskGroupBuilder {
        TaskGroupBuilder::new()
    }

    pub fn with_config(config: GroupConfig) -> Self {
        Self::from_parts(config, Scheduler::default())
    }

    pub(crate) fn from_parts(config: GroupConfig, scheduler: Scheduler) -> Self {
        let (sender, receiver) = channel();

        Self {
            id: NEXT_GROUP.fetch_add(1, Ordering::Relaxed),
            config,
            scheduler,
            shared: Arc::new(Shared::with_waker(Some(sender.clone()))),
            sender: Some(sender),
            receiver,
            threads: Vec::new(),
            forked: 0,
            scheduled: 0,
            joined: false,
            results: HashMap::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn outcome(&self) -> Outcome {
        self.shared.outcome()
    }

    /// Start `work` concurrently with the tasks forked so far.
    ///
    /// Never blocks. Fails with [`GroupError::InvalidState`] once the group
    /// has been joined. Work forked onto a group that already failed is
    /// never run.
    pub fn fork<T, F>(&mut self, work: F) -> Result<Handle<T>, GroupError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let name = format!("task-{}", self.forked);
        self.fork_named(name, work)
    }

    /// Same as [`fork`](TaskGroup::fork), with a name that shows up in
    /// errors, logs and diagnostics.
    pub fn fork_named<T, F>(
        &mut self,
        name: impl Into<Arc<str>>,
        work: F,
    ) -> Result<Handle<T>, GroupError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let sender = match (&self.sender, self.joined) {
            (Some(sender), false) => sender.clone(),
            _ => return Err(GroupError::InvalidState("fork called after join")),
        };

        let id = TaskId(self.forked);
        let name: Arc<str> = name.into();
        self.forked += 1;

        if self.shared.outcome() != Outcome::Running {
            tracing::debug!(group = %self.config.name, task = %name, "group already ended, skipping");
            self.diagnostics.executions.insert(
                id,
                TaskExecution {
                    name,
                    start: Instant::now(),
                    duration: Duration::ZERO,
                    status: TaskStatus::Skipped,
                },
            );
            return Ok(Handle::new(self.id, id));
        }

        let span = tracing::span!(
            Level::INFO,
            "task",
            group = %self.config.name,
            id = %id,
            name = %name,
        );

        let job = Job {
            id,
            name,
            work: Box::new(move |ctx: &TaskContext| {
                work(ctx).map(|value| Arc::new(value) as Dynamic)
            }),
            shared: self.shared.clone(),
            sender,
            span,
        };

        self.shared.add_pending();
        if let Err(err) = runner::spawn(&self.scheduler, &self.config.name, job, &mut self.threads) {
            // The group guard is still held, this can't settle the group.
            self.shared.complete_one();
            self.forked -= 1;
            return Err(err);
        }
        self.scheduled += 1;

        Ok(Handle::new(self.id, id))
    }

    /// Wait for every task, or for the first failure, under the configured
    /// deadline if there is one.
    ///
    /// Returns `Ok(())` if and only if every forked task succeeded.
    pub fn join(&mut self) -> Result<(), GroupError> {
        let deadline = self.config.deadline;
        self.join_inner(deadline)
    }

    /// [`join`](TaskGroup::join) with an explicit deadline. When it expires
    /// the group fails with [`GroupError::Timeout`] and its tasks are
    /// cancelled.
    pub fn join_timeout(&mut self, deadline: Duration) -> Result<(), GroupError> {
        self.join_inner(Some(deadline))
    }

    fn join_inner(&mut self, deadline: Option<Duration>) -> Result<(), GroupError> {
        if self.joined {
            return Err(GroupError::InvalidState("join called twice"));
        }
        self.joined = true;

        let span = tracing::span!(Level::INFO, "join", group = %self.config.name);
        span.pb_set_length(self.scheduled as u64);
        span.pb_set_style(&progress_style());
        span.pb_set_message(&format!("Running {}", self.config.name));
        let _enter = span.enter();

        let expires = deadline.map(|d| Instant::now() + d);

        // Only running tasks hold senders from here on.
        self.sender = None;
        self.shared.complete_one();

        loop {
            if self.shared.outcome() != Outcome::Running {
                break;
            }

            let received = match expires {
                Some(expires) => self
                    .receiver
                    .recv_timeout(expires.saturating_duration_since(Instant::now())),
                None => self
                    .receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Signal::Completion(completion)) => {
                    self.accept(completion);
                    span.pb_inc(1);
                }
                Ok(Signal::Wake) => {}
                Err(RecvTimeoutError::Timeout) => {
                    let elapsed = deadline.unwrap_or_default();
                    if self.shared.fail(GroupError::Timeout(elapsed)).is_ok() {
                        tracing::warn!("deadline of {elapsed:?} elapsed, cancelling tasks");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // From here on the channel only disconnects once every task is done.
        self.shared.drop_waker();

        match self.shared.outcome() {
            Outcome::Succeeded => {
                // Every task sent its completion before settling the group.
                while let Ok(signal) = self.receiver.try_recv() {
                    if let Signal::Completion(completion) = signal {
                        self.accept(completion);
                        span.pb_inc(1);
                    }
                }
                self.reap();
            }
            Outcome::Failed | Outcome::Cancelled => self.wind_down(),
            Outcome::Running => {
                return Err(GroupError::InvalidState("all tasks ended without settling the group"));
            }
        }

        tracing::info!(outcome = ?self.shared.outcome(), "group joined");
        self.ensure_success()
    }

    fn accept(&mut self, completion: Completion) {
        let Completion {
            id,
            value,
            execution,
        } = completion;

        if let Some(value) = value {
            self.results.insert(id, value);
        }
        self.diagnostics.executions.insert(id, execution);
    }

    /// Give cancelled tasks the grace period to finish, then stop waiting.
    fn wind_down(&mut self) {
        let grace = Instant::now() + self.config.grace_period;

        loop {
            match self
                .receiver
                .recv_timeout(grace.saturating_duration_since(Instant::now()))
            {
                Ok(Signal::Completion(completion)) => self.accept(completion),
                Ok(Signal::Wake) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.reap();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let running = (self.forked as usize)
                        .saturating_sub(self.diagnostics.executions.len());
                    tracing::warn!(
                        "{running} task(s) still running after the grace period of {:?}, detaching",
                        self.config.grace_period
                    );
                    self.threads.clear();
                    break;
                }
            }
        }

        // Results are only published on success.
        self.results.clear();
    }

    fn reap(&mut self) {
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::warn!("task thread panicked outside of its task");
            }
        }
    }

    /// `Ok(())` if the joined group succeeded, its failure otherwise.
    pub fn ensure_success(&self) -> Result<(), GroupError> {
        if !self.joined {
            return Err(GroupError::InvalidState("group has not been joined"));
        }

        match self.shared.outcome() {
            Outcome::Succeeded => Ok(()),
            Outcome::Failed => Err(self
                .shared
                .failure()
                .unwrap_or(GroupError::InvalidState("failed group has no recorded cause"))),
            Outcome::Cancelled => Err(GroupError::Cancelled),
            Outcome::Running => Err(GroupError::InvalidState("group is still running")),
        }
    }

    /// The value produced by the task behind `handle`.
    ///
    /// Only available after a successful join.
    pub fn result_of<T>(&self, handle: Handle<T>) -> Result<&T, GroupError>
    where
        T: Send + Sync + 'static,
    {
        if !self.joined {
            return Err(GroupError::InvalidState("result requested before join"));
        }
        if self.shared.outcome() != Outcome::Succeeded {
            return Err(GroupError::InvalidState("result requested from a group that did not succeed"));
        }
        if handle.group != self.id {
            return Err(GroupError::InvalidState("handle belongs to another group"));
        }

        self.results
            .get(&handle.id)
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or(GroupError::InvalidState("no result recorded for handle"))
    }

    /// Cancel the group from the outside. No-op once the group has ended.
    pub fn shutdown(&self) -> bool {
        self.shared.shutdown()
    }

    /// A handle that can shut the group down from another thread while the
    /// owner is blocked in `join`.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shared.clone())
    }

    /// Per-task execution metrics, complete once the group is joined.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.joined && self.shared.shutdown() {
            tracing::debug!(group = %self.config.name, "dropped before join, cancelling tasks");
        }
    }
}

/// Shuts a [`TaskGroup`] down from anywhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Shared>);

impl ShutdownHandle {
    pub fn shutdown(&self) -> bool {
        self.0.shutdown()
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
