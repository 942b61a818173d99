//! Request shapes and query parameters.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Body for `PUT /api/v1/queues/{name}`. The timeout is integer seconds.
#[derive(Debug, Deserialize)]
pub struct UpsertQueueRequest {
    pub task_timeout: i64,
}

/// Body for `POST /api/v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub queue_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Body for `PUT /api/v1/tasks/{id}`.
///
/// `status` stays a string so an unknown name surfaces as a 400 rather than
/// a body-rejection; the remaining fields default to the stored values.
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Query parameters for `GET /api/v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub queue: Option<String>,
    pub status: Option<String>,
    /// Unix seconds.
    pub from: Option<i64>,
    /// Unix seconds.
    pub to: Option<i64>,
    pub sort_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub summary: Option<String>,
}

/// Query parameters for `GET /api/v1/tasks/next`.
#[derive(Debug, Deserialize)]
pub struct NextTaskQuery {
    pub queue: Option<String>,
}
