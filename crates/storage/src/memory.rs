//! In-memory store for tests and local development.
//!
//! Mirrors the observable semantics of the Postgres backend: FIFO leases
//! tie-broken by id, single assignment, the timeout error merge, soft
//! deletes and the stats identity.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use jobq_core::{Queue, Task, TaskFilter, TaskId, TaskStats, TaskStatus};

use crate::store::{sort_column, Store, StoreError, TIMEOUT_ERROR_MESSAGE};

#[derive(Debug, Default)]
struct Inner {
    queues: BTreeMap<String, Queue>,
    tasks: HashMap<TaskId, Task>,
}

/// Mutex-guarded maps behind the [`Store`] trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(queue) = &filter.queue_name {
        if &task.queue_name != queue {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if task.status != status {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if task.created_at < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if task.created_at > to {
            return false;
        }
    }
    true
}

fn compare_by(a: &Task, b: &Task, column: &str) -> Ordering {
    match column {
        "id" => a.id.cmp(&b.id),
        "queue_name" => a.queue_name.cmp(&b.queue_name),
        "status" => a.status.as_str().cmp(b.status.as_str()),
        "updated_at" => a.updated_at.cmp(&b.updated_at),
        "started_at" => a.started_at.cmp(&b.started_at),
        "completed_at" => a.completed_at.cmp(&b.completed_at),
        _ => a.created_at.cmp(&b.created_at),
    }
}

fn merge_timeout_error(data: &mut Value) {
    match data {
        Value::Object(fields) => {
            fields.insert("error".to_string(), json!(TIMEOUT_ERROR_MESSAGE));
        }
        _ => *data = json!({ "error": TIMEOUT_ERROR_MESSAGE }),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_queue(&self, queue: &Queue) -> Result<Queue, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        let entry = inner
            .queues
            .entry(queue.name.clone())
            .and_modify(|existing| {
                existing.task_timeout_secs = queue.task_timeout_secs;
                existing.updated_at = now;
            })
            .or_insert_with(|| Queue {
                name: queue.name.clone(),
                task_timeout_secs: queue.task_timeout_secs,
                created_at: now,
                updated_at: now,
            });

        Ok(entry.clone())
    }

    async fn get_queue(&self, name: &str) -> Result<Option<Queue>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.queues.get(name).cloned())
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, StoreError> {
        let inner = self.inner.lock().unwrap();
        // BTreeMap iterates in key order, i.e. name ascending.
        Ok(inner.queues.values().cloned().collect())
    }

    async fn create_task(&self, task: &Task) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id));
        }
        if !inner.queues.contains_key(&task.queue_name) {
            return Err(StoreError::NotFound(format!("queue {}", task.queue_name)));
        }

        let now = Utc::now();
        let mut stored = task.clone();
        stored.created_at = now;
        stored.updated_at = now;
        inner.tasks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task.id)))?;

        existing.status = task.status;
        existing.data = task.data.clone();
        existing.assigned_to = task.assigned_to.clone();
        existing.started_at = task.started_at;
        existing.completed_at = task.completed_at;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| matches(t, filter))
            .cloned()
            .collect();

        match filter.sort_by.as_deref().and_then(sort_column) {
            Some(column) => tasks.sort_by(|a, b| compare_by(a, b, column)),
            None => tasks.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            }),
        }

        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.max(0) as usize;
        Ok(tasks.into_iter().skip(offset).take(limit).collect())
    }

    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut stats = TaskStats::default();
        for task in inner.tasks.values().filter(|t| matches(t, filter)) {
            stats.record(task.status);
        }
        Ok(stats)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task.status = TaskStatus::Deleted;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn lease_next_task(
        &self,
        queue_name: &str,
        consumer_id: &str,
    ) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.queues.contains_key(queue_name) {
            return Err(StoreError::NotFound(format!("queue {queue_name}")));
        }

        // Oldest pending, unassigned task; created_at ties broken by id.
        let next = inner
            .tasks
            .values()
            .filter(|t| {
                t.queue_name == queue_name
                    && t.status == TaskStatus::Pending
                    && t.assigned_to.is_none()
            })
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let now = Utc::now();
        let task = inner.tasks.get_mut(&id).unwrap();
        task.status = TaskStatus::Running;
        task.assigned_to = Some(consumer_id.to_string());
        task.started_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn mark_expired_tasks(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        let timeouts: HashMap<String, i64> = inner
            .queues
            .values()
            .map(|q| (q.name.clone(), q.task_timeout_secs))
            .collect();

        let mut reclaimed = 0;
        for task in inner.tasks.values_mut() {
            if task.status != TaskStatus::Running {
                continue;
            }
            let (Some(started_at), Some(timeout_secs)) =
                (task.started_at, timeouts.get(&task.queue_name))
            else {
                continue;
            };
            if started_at + chrono::Duration::seconds(*timeout_secs) < now {
                task.status = TaskStatus::Failed;
                merge_timeout_error(&mut task.data);
                task.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}
