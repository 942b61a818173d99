//! Queue service: identity and validation rules, status-transition
//! enforcement, and ownership of the timeout sweeper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use jobq_core::{Error, Queue, Result, Task, TaskFilter, TaskId, TaskStats, TaskStatus};
use jobq_storage::{Store, StoreError};

use crate::sweeper::{SweeperHandle, TimeoutSweeper, DEFAULT_SWEEP_INTERVAL};

const DEFAULT_LIST_LIMIT: i64 = 10;
const MAX_LIST_LIMIT: i64 = 100;

/// Caller-supplied fields for a task update.
///
/// `status` is required; the remaining fields default to the stored values,
/// so `assigned_to` survives terminal transitions as an audit trail.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub data: Option<serde_json::Value>,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Business layer between the HTTP surface and the store.
///
/// Owns exactly one [`TimeoutSweeper`], started at construction and stopped
/// by [`QueueService::shutdown`].
pub struct QueueService {
    store: Arc<dyn Store>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl QueueService {
    /// Service with the production sweep interval.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_sweep_interval(store, DEFAULT_SWEEP_INTERVAL)
    }

    /// Service with a custom sweep interval (tests use sub-second values).
    pub fn with_sweep_interval(store: Arc<dyn Store>, sweep_interval: Duration) -> Self {
        let sweeper = TimeoutSweeper::spawn(store.clone(), sweep_interval);
        Self {
            store,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>> {
        if name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        self.store.get_queue(name).await.map_err(store_error)
    }

    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        self.store.list_queues().await.map_err(store_error)
    }

    pub async fn upsert_queue(&self, queue: &Queue) -> Result<Queue> {
        if queue.name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        if queue.task_timeout_secs <= 0 {
            return Err(Error::validation("task timeout must be positive"));
        }
        self.store.upsert_queue(queue).await.map_err(store_error)
    }

    /// Create a task in `queue_name`. The id is assigned here; the task
    /// starts out `pending`.
    pub async fn create_task(&self, queue_name: &str, data: serde_json::Value) -> Result<Task> {
        if queue_name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        let queue = self.store.get_queue(queue_name).await.map_err(store_error)?;
        if queue.is_none() {
            return Err(Error::not_found(format!("queue {queue_name} does not exist")));
        }

        let task = Task::new(queue_name, data);
        self.store.create_task(&task).await.map_err(store_error)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.store.get_task(id).await.map_err(store_error)
    }

    /// Apply an update after validating the status transition against the
    /// current row.
    pub async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let existing = self
            .store
            .get_task(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| Error::not_found(format!("task {id} does not exist")))?;

        if !existing.status.can_transition_to(update.status) {
            return Err(Error::conflict(format!(
                "invalid status transition from {} to {}",
                existing.status, update.status
            )));
        }

        let mut task = existing;
        task.status = update.status;
        if let Some(data) = update.data {
            task.data = data;
        }
        if update.assigned_to.is_some() {
            task.assigned_to = update.assigned_to;
        }
        if update.started_at.is_some() {
            task.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            task.completed_at = update.completed_at;
        }

        match task.status {
            TaskStatus::Completed | TaskStatus::Failed => {
                if task.completed_at.is_none() {
                    task.completed_at = Some(Utc::now());
                }
            }
            // Re-enqueue: the lease predicate requires an unassigned row.
            TaskStatus::Pending => {
                task.assigned_to = None;
                task.started_at = None;
                task.completed_at = None;
            }
            _ => {}
        }

        self.store.update_task(&task).await.map_err(store_error)
    }

    pub async fn list_tasks(&self, mut filter: TaskFilter) -> Result<Vec<Task>> {
        filter.limit = clamp_limit(filter.limit);
        filter.offset = filter.offset.max(0);
        self.store.list_tasks(&filter).await.map_err(store_error)
    }

    /// Aggregation is bounded by the predicate, so no limit clamp applies.
    pub async fn task_stats(&self, filter: TaskFilter) -> Result<TaskStats> {
        self.store.task_stats(&filter).await.map_err(store_error)
    }

    /// Lease the next pending task in `queue_name` for `client_id`.
    pub async fn get_next_task(&self, queue_name: &str, client_id: &str) -> Result<Option<Task>> {
        if queue_name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        if client_id.is_empty() {
            return Err(Error::validation("client ID is required"));
        }
        self.store
            .lease_next_task(queue_name, client_id)
            .await
            .map_err(store_error)
    }

    /// Soft delete. Enforced through the same transition table as
    /// [`QueueService::update_task`], so deleting a deleted task conflicts.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let existing = self
            .store
            .get_task(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| Error::not_found(format!("task {id} does not exist")))?;

        if !existing.status.can_transition_to(TaskStatus::Deleted) {
            return Err(Error::conflict(format!(
                "invalid status transition from {} to deleted",
                existing.status
            )));
        }

        self.store.delete_task(id).await.map_err(store_error)
    }

    /// Stop the sweeper. Idempotent; returns once the current tick settles.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIST_LIMIT
    } else {
        limit.min(MAX_LIST_LIMIT)
    }
}

fn store_error(err: StoreError) -> Error {
    match err {
        StoreError::NotFound(_) => Error::NotFound(err.to_string()),
        StoreError::AlreadyExists(_) => Error::Internal(err.to_string()),
        StoreError::Backend { .. } => Error::Transient(err.to_string()),
    }
}
