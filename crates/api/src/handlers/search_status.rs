//! Handlers for publishing search-status transitions.
//!
//! The workflow publisher normally writes to the broker directly; this
//! endpoint is its HTTP face for publishers that cannot reach the broker.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use searchcast_core::error::CoreError;
use searchcast_core::StatusEvent;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Acknowledgement returned once an event has been handed to the broker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAccepted {
    pub search_id: String,
}

/// POST /api/v1/search-status
///
/// Publishes one status transition on the status channel. Delivery to
/// open streams is at-most-once; `202 Accepted` only means the broker took
/// the message.
pub async fn publish_status(
    State(state): State<AppState>,
    payload: Result<Json<StatusEvent>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(event) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    event
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    state.broker.publish(&event).await?;

    tracing::info!(
        search_id = %event.search_id,
        status = ?event.status,
        step = ?event.step,
        "Status event published",
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: PublishAccepted {
                search_id: event.search_id,
            },
        }),
    ))
}
