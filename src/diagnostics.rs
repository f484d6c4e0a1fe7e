use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::TaskId;

/// How a single task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Panicked,
    /// Stopped early after observing cancellation.
    Cancelled,
    /// The group had already ended before the work could start.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: Arc<str>,
    pub start: Instant,
    pub duration: Duration,
    pub status: TaskStatus,
}

/// Execution metrics of a joined group.
///
/// Tasks that were still running when the grace period ran out have no entry.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub executions: BTreeMap<TaskId, TaskExecution>,
}

impl Diagnostics {
    pub fn get(&self, id: TaskId) -> Option<&TaskExecution> {
        self.executions.get(&id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.executions
            .values()
            .filter(|exec| exec.status == status)
            .count()
    }

    /// The longest running task, if any ran.
    pub fn slowest(&self) -> Option<(TaskId, &TaskExecution)> {
        self.executions
            .iter()
            .filter(|(_, exec)| exec.status != TaskStatus::Skipped)
            .max_by_key(|(_, exec)| exec.duration)
            .map(|(id, exec)| (*id, exec))
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .executions
            .values()
            .map(|exec| exec.name.len())
            .max()
            .unwrap_or(0)
            .max(4);

        writeln!(f, "{:<6} {:<width$} {:<10} {:>12}", "id", "name", "status", "duration")?;
        for (id, exec) in &self.executions {
            writeln!(
                f,
                "{:<6} {:<width$} {:<10} {:>12}",
                id.to_string(),
                exec.name,
                format!("{:?}", exec.status),
                format!("{:.2?}", exec.duration),
            )?;
        }

        Ok(())
    }
}
