use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::http::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;

use crate::bridge::{Frame, SubscriptionHandle};
use crate::state::AppState;

/// Event-type tag of a regular status update.
pub const STATUS_UPDATE_EVENT: &str = "search-status-update";

/// Event-type tag of the terminal error frame.
pub const ERROR_EVENT: &str = "error";

/// Turn a bridge frame into its event-type tag and JSON payload.
pub fn frame_parts(frame: &Frame) -> Result<(&'static str, String), serde_json::Error> {
    match frame {
        Frame::Status { event, .. } => Ok((STATUS_UPDATE_EVENT, serde_json::to_string(event)?)),
        Frame::Error { message } => Ok((
            ERROR_EVENT,
            serde_json::to_string(&serde_json::json!({ "error": message }))?,
        )),
    }
}

/// Encode a bridge frame as one SSE unit (`event:` + `data:` lines).
///
/// Returns `None` if the payload cannot be serialized; the frame is then
/// skipped.
pub fn encode_frame(frame: &Frame) -> Option<Event> {
    match frame_parts(frame) {
        Ok((event_type, data)) => Some(Event::default().event(event_type).data(data)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream frame");
            None
        }
    }
}

/// GET /api/v1/search-status/stream
///
/// Registers the connection with the bridge and streams every status event
/// until the client disconnects, the broker subscription fails (one
/// terminal `error` event, then close), or the server shuts down.
///
/// Dropping the response body (client gone) drops the subscription handle,
/// which deregisters it from the bridge.
pub async fn search_status_stream(State(state): State<AppState>) -> impl IntoResponse {
    let handle = state.bridge.accept().await;
    tracing::info!(subscription_id = %handle.id(), "Search status stream opened");

    let stream = futures::stream::unfold(handle, |mut handle: SubscriptionHandle| async move {
        loop {
            let frame = handle.next_frame().await?;
            if let Some(event) = encode_frame(&frame) {
                return Some((Ok::<_, Infallible>(event), handle));
            }
        }
    });

    let headers = [
        (CACHE_CONTROL, "no-cache, no-transform"),
        (CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.config.sse_keepalive_secs))
        .text("keepalive");

    (headers, Sse::new(stream).keep_alive(keep_alive))
}
