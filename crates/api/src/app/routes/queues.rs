use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use jobq_core::{Error, Queue};
use jobq_queue::QueueService;

use crate::app::dto::UpsertQueueRequest;
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_queues))
        .route("/:name", get(get_queue).put(upsert_queue))
}

/// GET /api/v1/queues
async fn list_queues(
    Extension(service): Extension<Arc<QueueService>>,
) -> axum::response::Response {
    match service.list_queues().await {
        Ok(queues) => (StatusCode::OK, Json(queues)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /api/v1/queues/{name}
async fn get_queue(
    Extension(service): Extension<Arc<QueueService>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match service.get_queue(&name).await {
        Ok(Some(queue)) => (StatusCode::OK, Json(queue)).into_response(),
        Ok(None) => errors::error_response(Error::not_found("queue not found")),
        Err(err) => errors::error_response(err),
    }
}

/// PUT /api/v1/queues/{name}
async fn upsert_queue(
    Extension(service): Extension<Arc<QueueService>>,
    Path(name): Path<String>,
    Json(req): Json<UpsertQueueRequest>,
) -> axum::response::Response {
    let now = Utc::now();
    let queue = Queue {
        name,
        task_timeout_secs: req.task_timeout,
        created_at: now,
        updated_at: now,
    };

    match service.upsert_queue(&queue).await {
        Ok(queue) => (StatusCode::OK, Json(queue)).into_response(),
        Err(err) => errors::error_response(err),
    }
}
