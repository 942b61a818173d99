use axum::Router;

pub mod queues;
pub mod system;
pub mod tasks;

/// Router for everything under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .nest("/queues", queues::router())
        .nest("/tasks", tasks::router())
}
