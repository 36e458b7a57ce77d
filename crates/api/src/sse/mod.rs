//! Server-sent event stream of search-status updates.
//!
//! Provides the long-lived `GET` endpoint that browsers hold open to
//! receive status events as the bridge dispatches them.

mod handler;

pub use handler::{encode_frame, frame_parts, search_status_stream, ERROR_EVENT, STATUS_UPDATE_EVENT};
