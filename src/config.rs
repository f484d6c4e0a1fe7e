#[cfg(feature = "rayon")]
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TaskGroup;

/// Default time a failed or cancelled group keeps waiting for its remaining
/// tasks to notice the cancellation before `join` returns anyway.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Plain settings of a [`TaskGroup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Used in thread names, log spans and diagnostics.
    pub name: String,
    /// Overall deadline applied by [`TaskGroup::join`], measured from the
    /// moment `join` is called.
    pub deadline: Option<Duration>,
    /// How long `join` waits for cancelled tasks to wind down.
    pub grace_period: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            name: String::from("group"),
            deadline: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Where forked tasks run.
#[derive(Debug, Clone, Default)]
pub enum Scheduler {
    /// One dedicated OS thread per task.
    #[default]
    Thread,
    /// A shared rayon pool. A task blocking a pool thread without polling
    /// its cancellation token can hold back siblings queued behind it.
    #[cfg(feature = "rayon")]
    Pool(Arc<rayon::ThreadPool>),
}

/// Builder for [`TaskGroup`].
///
/// ```rust
/// use std::time::Duration;
/// use taskgroup::TaskGroup;
///
/// let group = TaskGroup::builder()
///     .name("fetch")
///     .deadline(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct TaskGroupBuilder {
    config: GroupConfig,
    scheduler: Scheduler,
}

impl TaskGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Replace every plain setting at once, e.g. with a deserialized config.
    pub fn config(mut self, config: GroupConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TaskGroup {
        TaskGroup::from_parts(self.config, self.scheduler)
    }
}
