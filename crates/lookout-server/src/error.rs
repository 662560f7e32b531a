use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lookout_core::LookoutError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
}

/// Errors surfaced to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// Webhook signature missing or wrong.
    Unauthorized,
    /// The request conflicts with existing state.
    Conflict(String),
    Core(LookoutError),
}

impl From<LookoutError> for ApiError {
    fn from(err: LookoutError) -> Self {
        ApiError::Core(err)
    }
}

pub fn map_error(err: &ApiError) -> (StatusCode, Json<ErrorEnvelope>) {
    let (status, code, message) = match err {
        ApiError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "Invalid signature".to_string(),
        ),
        ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message.clone()),
        ApiError::Core(core) => map_core_error(core),
    };
    (status, Json(ErrorEnvelope { code, message }))
}

fn map_core_error(err: &LookoutError) -> (StatusCode, &'static str, String) {
    match err {
        LookoutError::Validation(_) | LookoutError::Serialization(_) => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        LookoutError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        LookoutError::InvalidTransition { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            err.to_string(),
        ),
        LookoutError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            err.to_string(),
        ),
        _ => {
            tracing::error!(error = %err, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                err.to_string(),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        map_error(&self).into_response()
    }
}
