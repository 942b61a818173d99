//! Queue and task records plus the list filter shared by the storage layer,
//! the HTTP surface and the client library.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TaskId;
use crate::status::TaskStatus;

/// A named queue with a uniform execution timeout.
///
/// `task_timeout` is an integer number of seconds both in storage and on the
/// wire. Creation is an idempotent upsert keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(rename = "task_timeout")]
    pub task_timeout_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    pub fn new(name: impl Into<String>, task_timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            task_timeout_secs: task_timeout.as_secs() as i64,
            created_at: now,
            updated_at: now,
        }
    }

    /// The per-task execution deadline for this queue.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs.max(0) as u64)
    }
}

/// A persisted unit of work.
///
/// `data` is opaque JSON: it passes through the system untouched except for
/// the single error-merge on lease expiry. `assigned_to` is set while the
/// task is running and may survive terminal transitions as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub queue_name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh pending task for `queue_name` carrying `data`.
    pub fn new(queue_name: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            queue_name: queue_name.into(),
            status: TaskStatus::Pending,
            data,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Optional predicates and pagination for task listing and stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub queue_name: Option<String>,
    pub status: Option<TaskStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sort_by: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self {
            limit: 10,
            ..Default::default()
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_date_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_sort(mut self, sort_by: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self
    }

    pub fn with_pagination(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Per-status task counts over a filter predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub all: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub deleted: i64,
}

impl TaskStats {
    /// Count one task.
    pub fn record(&mut self, status: TaskStatus) {
        self.all += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Deleted => self.deleted += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.all == self.pending + self.running + self.completed + self.failed + self.deleted
    }
}
