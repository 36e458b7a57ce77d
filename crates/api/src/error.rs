use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use searchcast_core::error::CoreError;
use searchcast_events::BrokerError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `searchcast_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The broker rejected or could not take a publish.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- Broker errors ---
            AppError::Broker(err) => {
                tracing::error!(error = %err, "Broker error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "BROKER_UNAVAILABLE",
                    "The status channel is unavailable".to_string(),
                )
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
