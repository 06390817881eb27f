//! Maps the core's validation failures (plain `&'static str`s, by design --
//! runtime errors never surface here, only through metrics) onto the status
//! codes of the control API's §6 table.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    /// The core reports validation failures as a bare `&'static str`; sort
    /// them into 404 for "unknown id" and 400 for everything else (empty
    /// groups, duplicate ids, mutation while running).
    pub fn from_validation(message: &'static str) -> Self {
        if message.contains("unknown") {
            ApiError::NotFound(message.to_string())
        } else {
            ApiError::BadRequest(message.to_string())
        }
    }

    /// `/api/clients/{id}` rejects every method with a 5xx while the
    /// simulation is running, per §6 -- distinct from the 400 the collection
    /// endpoints use for the same condition.
    pub fn running() -> Self {
        ApiError::Internal("simulation is running".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
