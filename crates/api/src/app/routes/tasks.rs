use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{TimeZone, Utc};

use jobq_core::{Error, TaskFilter, TaskId, TaskStatus};
use jobq_queue::{QueueService, TaskUpdate};

use crate::app::dto::{CreateTaskRequest, NextTaskQuery, TaskListQuery, UpdateTaskRequest};
use crate::app::errors;

/// Consumer identity header used by `GET /tasks/next`.
const CLIENT_ID_HEADER: &str = "x-client-id";

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/next", get(next_task))
        .route("/:id", put(update_task).delete(delete_task))
}

/// POST /api/v1/tasks
async fn create_task(
    Extension(service): Extension<Arc<QueueService>>,
    Json(req): Json<CreateTaskRequest>,
) -> axum::response::Response {
    match service.create_task(&req.queue_name, req.data).await {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /api/v1/tasks
///
/// Returns the filtered task list, or the stats object when
/// `summary=true`.
async fn list_tasks(
    Extension(service): Extension<Arc<QueueService>>,
    Query(query): Query<TaskListQuery>,
) -> axum::response::Response {
    let filter = match build_filter(&query) {
        Ok(filter) => filter,
        Err(err) => return errors::error_response(err),
    };

    if query.summary.as_deref() == Some("true") {
        return match service.task_stats(filter).await {
            Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
            Err(err) => errors::error_response(err),
        };
    }

    match service.list_tasks(filter).await {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /api/v1/tasks/next?queue=NAME with the `X-Client-ID` header.
async fn next_task(
    Extension(service): Extension<Arc<QueueService>>,
    Query(query): Query<NextTaskQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    let queue = query.queue.unwrap_or_default();
    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match service.get_next_task(&queue, &client_id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "No tasks available"),
        Err(err) => errors::error_response(err),
    }
}

/// PUT /api/v1/tasks/{id}
async fn update_task(
    Extension(service): Extension<Arc<QueueService>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> axum::response::Response {
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::error_response(err),
    };
    let status: TaskStatus = match req.status.parse() {
        Ok(status) => status,
        Err(err) => return errors::error_response(err),
    };

    let update = TaskUpdate {
        status,
        data: req.data,
        assigned_to: req.assigned_to,
        started_at: req.started_at,
        completed_at: req.completed_at,
    };

    match service.update_task(id, update).await {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// DELETE /api/v1/tasks/{id}
async fn delete_task(
    Extension(service): Extension<Arc<QueueService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::error_response(err),
    };

    match service.delete_task(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::error_response(err),
    }
}

fn build_filter(query: &TaskListQuery) -> Result<TaskFilter, Error> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let parse_unix = |secs: i64| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| Error::validation(format!("invalid unix timestamp: {secs}")))
    };
    let from = query.from.map(parse_unix).transpose()?;
    let to = query.to.map(parse_unix).transpose()?;

    Ok(TaskFilter {
        queue_name: query.queue.clone(),
        status,
        from,
        to,
        sort_by: query.sort_by.clone(),
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(0),
    })
}
