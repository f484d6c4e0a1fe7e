use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::TaskId;

/// The error a task failed with, shared so the group can hand it out more
/// than once.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct TaskCause(#[from] pub(crate) Arc<anyhow::Error>);

impl TaskCause {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Access the underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for TaskCause {
    fn from(e: anyhow::Error) -> Self {
        TaskCause(Arc::new(e))
    }
}

/// Returned by a task that observed cancellation and stopped early.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Task observed cancellation")]
pub struct Cancelled;

#[derive(Debug, Error, Clone)]
pub enum GroupError {
    #[error("Task '{name}' ({id}) failed:\n{cause}")]
    TaskFailure {
        id: TaskId,
        name: Arc<str>,
        cause: TaskCause,
    },

    #[error("Group deadline of {0:?} elapsed")]
    Timeout(Duration),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Group was cancelled")]
    Cancelled,

    #[error("Couldn't spawn task thread.\n{0}")]
    Spawn(Arc<std::io::Error>),
}

impl From<std::io::Error> for GroupError {
    fn from(e: std::io::Error) -> Self {
        GroupError::Spawn(Arc::new(e))
    }
}

impl GroupError {
    /// The task that caused the failure, if a task caused it.
    pub fn task(&self) -> Option<TaskId> {
        match self {
            GroupError::TaskFailure { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_names_task() {
        let err = GroupError::TaskFailure {
            id: TaskId(2),
            name: "fetch".into(),
            cause: TaskCause::new(anyhow::anyhow!("boom")),
        };

        let msg = err.to_string();
        assert!(msg.contains("'fetch'"));
        assert!(msg.contains("#2"));
        assert!(msg.contains("boom"));
        assert_eq!(err.task(), Some(TaskId(2)));
    }

    #[test]
    fn test_cancelled_roundtrips_through_anyhow() {
        let err: anyhow::Error = Cancelled.into();
        assert!(err.is::<Cancelled>());
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = GroupError::TaskFailure {
            id: TaskId(0),
            name: "a".into(),
            cause: TaskCause::new(anyhow::anyhow!("x")),
        };
        let copy = err.clone();

        match (err, copy) {
            (
                GroupError::TaskFailure { cause: a, .. },
                GroupError::TaskFailure { cause: b, .. },
            ) => assert!(Arc::ptr_eq(&a.0, &b.0)),
            _ => unreachable!(),
        }
    }
}
