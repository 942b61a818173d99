//! HTTP application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request shapes and query parameters
//! - `errors.rs`: consistent error responses
//! - `dashboard.rs`: embedded static dashboard

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use jobq_queue::QueueService;

pub mod dashboard;
pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(service: Arc<QueueService>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::router())
        .merge(dashboard::router())
        .layer(ServiceBuilder::new().layer(Extension(service)))
}
