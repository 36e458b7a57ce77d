pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::sse;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /search-status                 publish a status event (POST)
/// /search-status/stream          live event stream (GET, text/event-stream)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/search-status", post(handlers::search_status::publish_status))
        .route("/search-status/stream", get(sse::search_status_stream))
}
