pub mod health;
pub mod jobs;
pub mod triggers;

// Common response types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::errors::EngineError;
use serde::Serialize;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Map an engine error onto the HTTP surface.
pub fn engine_error_response(err: EngineError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::Unauthorized { .. } | EngineError::InvalidSignature(_) => {
            (StatusCode::UNAUTHORIZED, "unauthorized")
        }
        EngineError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
        EngineError::Saturated => (StatusCode::TOO_MANY_REQUESTS, "saturated"),
        EngineError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        EngineError::CycleRejected { .. } => (StatusCode::CONFLICT, "cycle_rejected"),
        EngineError::InvalidRecurrence(_) => (StatusCode::BAD_REQUEST, "invalid_recurrence"),
    };
    (status, Json(ErrorResponse::new(code, err.to_string())))
}
