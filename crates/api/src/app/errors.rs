use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use jobq_core::Error;

/// Map a domain error to its wire form.
pub fn error_response(err: Error) -> axum::response::Response {
    let status = match &err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) | Error::Canceled | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, err.to_string())
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
