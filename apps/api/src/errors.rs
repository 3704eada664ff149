use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// The wire shape is a flat envelope: `{"error": <code>}` plus an optional
/// human-readable `message` and, for rate limiting, the `limit` that was hit.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input. The string is shown to the client.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A spam heuristic tripped. The code is surfaced verbatim but carries no
    /// detail about which signal fired.
    #[error("Spam rejected: {0}")]
    Spam(&'static str),

    /// A daily ceiling was exceeded. Normal control flow, not a failure.
    #[error("Rate limited (ceiling {limit})")]
    RateLimited { limit: i64, message: &'static str },

    #[error("Not found")]
    NotFound,

    /// The `action` query parameter named no known endpoint.
    #[error("Unknown action")]
    UnknownAction,

    /// Load-shed valve is closed for mutating requests.
    #[error("Shedding load")]
    Busy,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_request", "message": msg }),
            ),
            AppError::Spam(code) => (StatusCode::BAD_REQUEST, json!({ "error": code })),
            AppError::RateLimited { limit, message } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "rate_limited", "message": message, "limit": limit }),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not_found" })),
            AppError::UnknownAction => {
                (StatusCode::NOT_FOUND, json!({ "error": "unknown_action" }))
            }
            AppError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "busy",
                    "message": "Server is under temporary heavy load. Please try again in a minute."
                }),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "message": "A storage error occurred" }),
                )
            }
            AppError::Upload(msg) => {
                tracing::error!("Upload error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "message": "Failed to save file" }),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "message": "An internal server error occurred" }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, AppError::Busy) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("60"));
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                header::HeaderValue::from_static("no-store"),
            );
        }
        response
    }
}
