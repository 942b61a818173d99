//! Postgres-backed store.
//!
//! All mutating paths go through single statements or explicit transactions;
//! the lease path relies on `FOR UPDATE SKIP LOCKED` so that concurrent
//! leasers never block on, or receive, each other's rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use jobq_core::{Queue, Task, TaskFilter, TaskId, TaskStats, TaskStatus};

use crate::store::{sort_column, Store, StoreError, TIMEOUT_ERROR_MESSAGE};

const TASK_COLUMNS: &str =
    "id, queue_name, status, data, assigned_to, created_at, updated_at, started_at, completed_at";

/// Production store on a sqlx connection pool.
///
/// `PgPool` is internally reference-counted; cloning the store shares the
/// pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_queue(&self, queue: &Queue) -> Result<Queue, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO queues (name, task_timeout, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (name)
            DO UPDATE SET
                task_timeout = EXCLUDED.task_timeout,
                updated_at = NOW()
            RETURNING name, task_timeout, created_at, updated_at
            "#,
        )
        .bind(&queue.name)
        .bind(queue.task_timeout_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("upsert_queue", e))?;

        queue_from_row(&row)
    }

    async fn get_queue(&self, name: &str) -> Result<Option<Queue>, StoreError> {
        let row = sqlx::query(
            "SELECT name, task_timeout, created_at, updated_at FROM queues WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::backend("get_queue", e))?;

        row.as_ref().map(queue_from_row).transpose()
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, task_timeout, created_at, updated_at FROM queues ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend("list_queues", e))?;

        rows.iter().map(queue_from_row).collect()
    }

    async fn create_task(&self, task: &Task) -> Result<Task, StoreError> {
        let sql = format!(
            "INSERT INTO tasks (id, queue_name, status, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.id.as_uuid())
            .bind(&task.queue_name)
            .bind(task.status.as_str())
            .bind(&task.data)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_pg_error_code(&e, "23503") {
                    // Foreign key: the queue vanished between the service
                    // check and the insert.
                    StoreError::NotFound(format!("queue {}", task.queue_name))
                } else if is_pg_error_code(&e, "23505") {
                    StoreError::AlreadyExists(task.id)
                } else {
                    StoreError::backend("create_task", e)
                }
            })?;

        task_from_row(&row)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend("get_task", e))?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(&self, task: &Task) -> Result<Task, StoreError> {
        let sql = format!(
            "UPDATE tasks \
             SET status = $1, \
                 data = $2, \
                 assigned_to = $3, \
                 started_at = $4, \
                 completed_at = $5, \
                 updated_at = NOW() \
             WHERE id = $6 \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.status.as_str())
            .bind(&task.data)
            .bind(task.assigned_to.as_deref())
            .bind(task.started_at)
            .bind(task.completed_at)
            .bind(task.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend("update_task", e))?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task.id)))?;

        task_from_row(&row)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        // The order-by column comes from the whitelist, never from the
        // caller's string.
        let order = filter
            .sort_by
            .as_deref()
            .and_then(sort_column)
            .map(|column| format!("{column} ASC"))
            .unwrap_or_else(|| "created_at DESC".to_string());

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE ($1::text IS NULL OR queue_name = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
               AND ($4::timestamptz IS NULL OR created_at <= $4) \
             ORDER BY {order} \
             LIMIT $5 OFFSET $6"
        );

        let rows = sqlx::query(&sql)
            .bind(filter.queue_name.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::backend("list_tasks", e))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS all_count,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'deleted') AS deleted
            FROM tasks
            WHERE ($1::text IS NULL OR queue_name = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            "#,
        )
        .bind(filter.queue_name.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("task_stats", e))?;

        let count = |name: &str| -> Result<i64, StoreError> {
            row.try_get::<i64, _>(name)
                .map_err(|e| StoreError::backend("task_stats", e))
        };

        Ok(TaskStats {
            all: count("all_count")?,
            pending: count("pending")?,
            running: count("running")?,
            completed: count("completed")?,
            failed: count("failed")?,
            deleted: count("deleted")?,
        })
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(TaskStatus::Deleted.as_str())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend("delete_task", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue = queue_name, consumer = consumer_id))]
    async fn lease_next_task(
        &self,
        queue_name: &str,
        consumer_id: &str,
    ) -> Result<Option<Task>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::backend("lease_begin", e))?;

        // The timeout itself is enforced client-side and by the sweeper;
        // reading it here doubles as the queue-existence check inside the
        // transaction.
        let queue_row = sqlx::query("SELECT task_timeout FROM queues WHERE name = $1")
            .bind(queue_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::backend("lease_queue_timeout", e))?;
        if queue_row.is_none() {
            return Err(StoreError::NotFound(format!("queue {queue_name}")));
        }

        // Oldest pending, unassigned task. SKIP LOCKED makes concurrent
        // leasers pass over rows another transaction already holds.
        let candidate = sqlx::query(
            r#"
            SELECT id FROM tasks
            WHERE queue_name = $1 AND status = $2 AND assigned_to IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue_name)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::backend("lease_select", e))?;

        let Some(candidate) = candidate else {
            // Nothing pending; dropping the transaction rolls it back.
            return Ok(None);
        };
        let id: Uuid = candidate
            .try_get("id")
            .map_err(|e| StoreError::backend("lease_select", e))?;

        let sql = format!(
            "UPDATE tasks \
             SET status = $1, assigned_to = $2, started_at = NOW(), updated_at = NOW() \
             WHERE id = $3 \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(TaskStatus::Running.as_str())
            .bind(consumer_id)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::backend("lease_update", e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::backend("lease_commit", e))?;

        task_from_row(&row).map(Some)
    }

    #[instrument(skip(self))]
    async fn mark_expired_tasks(&self) -> Result<u64, StoreError> {
        // Set-based reclaim; preserves object payloads and replaces
        // non-object ones with a fresh error object.
        let result = sqlx::query(
            r#"
            UPDATE tasks t
            SET status = $1,
                updated_at = NOW(),
                data = jsonb_set(
                    CASE
                        WHEN jsonb_typeof(t.data) = 'object' THEN t.data
                        ELSE '{}'::jsonb
                    END,
                    '{error}',
                    to_jsonb($2::text)
                )
            FROM queues q
            WHERE t.queue_name = q.name
              AND t.status = $3
              AND t.started_at + q.task_timeout * INTERVAL '1 second' < NOW()
            "#,
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(TIMEOUT_ERROR_MESSAGE)
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend("mark_expired_tasks", e))?;

        Ok(result.rows_affected())
    }
}

fn queue_from_row(row: &PgRow) -> Result<Queue, StoreError> {
    let decode = |e: sqlx::Error| StoreError::backend("decode_queue", e);
    Ok(Queue {
        name: row.try_get("name").map_err(decode)?,
        task_timeout_secs: row.try_get("task_timeout").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let decode = |e: sqlx::Error| StoreError::backend("decode_task", e);

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let status: TaskStatus = status
        .parse()
        .map_err(|e| StoreError::backend("decode_task", e))?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at").map_err(decode)?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at").map_err(decode)?;

    Ok(Task {
        id: TaskId::from_uuid(id),
        queue_name: row.try_get("queue_name").map_err(decode)?,
        status,
        data: row.try_get("data").map_err(decode)?,
        assigned_to: row.try_get("assigned_to").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        started_at,
        completed_at,
    })
}

fn is_pg_error_code(err: &sqlx::Error, code: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(c) = db_err.code() {
            return c.as_ref() == code;
        }
    }
    false
}
