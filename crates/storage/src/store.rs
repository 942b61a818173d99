//! Store abstraction over queue and task persistence.

use async_trait::async_trait;

use jobq_core::{Queue, Task, TaskFilter, TaskId, TaskStats};

/// Storage-boundary error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("task {0} already exists")]
    AlreadyExists(TaskId),
    #[error("storage error in {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }
}

/// Durable persistence of queues and tasks.
///
/// Every operation must be safe under concurrent callers. Returned values
/// are copies; caller-side mutation never propagates without an explicit
/// update call.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent insert-or-update keyed by queue name. Returns the row with
    /// storage-populated timestamps.
    async fn upsert_queue(&self, queue: &Queue) -> Result<Queue, StoreError>;

    /// `None` means absent, not an error.
    async fn get_queue(&self, name: &str) -> Result<Option<Queue>, StoreError>;

    /// All queues, sorted by name ascending.
    async fn list_queues(&self) -> Result<Vec<Queue>, StoreError>;

    /// Insert with the caller-provided id and status. Returns the row with
    /// storage-populated timestamps.
    async fn create_task(&self, task: &Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Overwrite `status`, `data`, `assigned_to`, `started_at` and
    /// `completed_at`; refresh `updated_at`. The caller is responsible for
    /// having validated the status transition.
    async fn update_task(&self, task: &Task) -> Result<Task, StoreError>;

    /// Apply the filter predicates with pagination. Default order is
    /// `created_at` descending; `sort_by` is resolved through a column
    /// whitelist.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Per-status counts over the same predicate as [`Store::list_tasks`]
    /// (pagination and sort are ignored).
    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError>;

    /// Soft delete: transition the row to `deleted` and refresh
    /// `updated_at`.
    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError>;

    /// Atomically lease the oldest pending, unassigned task in the queue:
    /// mark it running, record the consumer and the start time, and return
    /// it. `None` when the queue is empty. Under N concurrent callers each
    /// pending task is returned to at most one of them.
    async fn lease_next_task(
        &self,
        queue_name: &str,
        consumer_id: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Transition every running task whose lease has elapsed to `failed`,
    /// merging `{"error": "Task timeout exceeded"}` into its data. Returns
    /// the number of reclaimed tasks. Idempotent.
    async fn mark_expired_tasks(&self) -> Result<u64, StoreError>;
}

/// Message merged into the payload of a reclaimed task.
pub const TIMEOUT_ERROR_MESSAGE: &str = "Task timeout exceeded";

/// Resolve a user-supplied sort name to a known column.
///
/// Unknown names yield `None` and the caller falls back to the default
/// order; user input is never interpolated into SQL.
pub(crate) fn sort_column(name: &str) -> Option<&'static str> {
    match name {
        "id" => Some("id"),
        "queue_name" => Some("queue_name"),
        "status" => Some("status"),
        "created_at" => Some("created_at"),
        "updated_at" => Some("updated_at"),
        "started_at" => Some("started_at"),
        "completed_at" => Some("completed_at"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::sort_column;

    #[test]
    fn sort_whitelist_rejects_unknown_identifiers() {
        assert_eq!(sort_column("created_at"), Some("created_at"));
        assert_eq!(sort_column("updated_at"), Some("updated_at"));
        assert_eq!(sort_column("data"), None);
        assert_eq!(sort_column("created_at; DROP TABLE tasks"), None);
    }
}
