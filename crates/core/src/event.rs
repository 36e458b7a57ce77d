//! The status event carried on the broker channel and the event stream.
//!
//! Publishers emit JSON objects shaped like
//! `{"searchId": "...", "status": "active", "step": "scraping"}`.
//! Only `searchId` is mandatory; a missing `status` or `step` means
//! "unchanged" when the event is merged into a job.

use serde::{Deserialize, Serialize};

use crate::status::SearchStatus;
use crate::types::SearchId;

/// One transition of a search job, as published by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// The job this event refers to.
    pub search_id: SearchId,

    /// New lifecycle status, if the transition changed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SearchStatus>,

    /// Free-text label of the current workflow stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl StatusEvent {
    /// Build a fully populated event.
    pub fn new(search_id: impl Into<SearchId>, status: SearchStatus, step: impl Into<String>) -> Self {
        Self {
            search_id: search_id.into(),
            status: Some(status),
            step: Some(step.into()),
        }
    }

    /// Reject events that cannot be routed to any job.
    pub fn validate(&self) -> Result<(), EventParseError> {
        if self.search_id.trim().is_empty() {
            return Err(EventParseError::MissingSearchId);
        }
        Ok(())
    }
}

/// Why a raw payload could not be turned into a [`StatusEvent`].
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid status event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("status event has an empty searchId")]
    MissingSearchId,
}

/// Decode and validate a raw JSON payload.
pub fn parse_status_event(text: &str) -> Result<StatusEvent, EventParseError> {
    let event: StatusEvent = serde_json::from_str(text)?;
    event.validate()?;
    Ok(event)
}
