//! Task lifecycle states and the legal transitions between them.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Execution status of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, waiting to be leased.
    Pending,
    /// Leased by exactly one consumer.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or reclaimed after a lease timeout.
    Failed,
    /// Soft-deleted; terminal.
    Deleted,
}

impl TaskStatus {
    /// All states, in a fixed order. Used by stats and exhaustive tests.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Deleted)
    }

    /// Legal successor check.
    ///
    /// ```text
    /// pending   -> running, deleted
    /// running   -> completed, failed, deleted
    /// completed -> deleted
    /// failed    -> pending, deleted        (re-enqueue)
    /// deleted   -> (none)
    /// ```
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(to, Running | Deleted),
            Running => matches!(to, Completed | Failed | Deleted),
            Completed => matches!(to, Deleted),
            Failed => matches!(to, Pending | Deleted),
            Deleted => false,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(Error::validation(format!("unknown task status: {other}"))),
        }
    }
}
