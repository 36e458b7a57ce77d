//! Shared message types for the search-status pipeline.
//!
//! Everything that crosses a process boundary (broker payloads, event-stream
//! frames, bulk-fetch job summaries) is defined here so the bridge server
//! and the client reconciliation layer agree on one wire format.

pub mod backoff;
pub mod error;
pub mod event;
pub mod job;
pub mod status;
pub mod types;

pub use event::{parse_status_event, StatusEvent};
pub use job::SearchJob;
pub use status::SearchStatus;
