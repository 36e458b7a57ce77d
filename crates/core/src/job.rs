//! Search job summaries as returned by the bulk fetch endpoint.

use serde::{Deserialize, Serialize};

use crate::event::StatusEvent;
use crate::status::SearchStatus;
use crate::types::{SearchId, Timestamp};

/// Step label given to jobs whose summary carries no step yet.
pub const PENDING_STEP: &str = "pending";

fn pending_step() -> String {
    PENDING_STEP.to_string()
}

/// One user-submitted search.
///
/// `status` and `step` are only ever changed by applying a
/// [`StatusEvent`]; everything else is owned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchJob {
    pub id: SearchId,

    /// Identity of the actor that submitted the search.
    #[serde(default)]
    pub requester_id: Option<String>,

    /// Structured search parameters. Not interpreted here.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub created_at: Option<Timestamp>,

    #[serde(default)]
    pub status: SearchStatus,

    #[serde(default = "pending_step")]
    pub step: String,
}

impl SearchJob {
    /// A freshly submitted job in the pending state.
    pub fn pending(id: impl Into<SearchId>) -> Self {
        Self {
            id: id.into(),
            requester_id: None,
            params: serde_json::Map::new(),
            created_at: None,
            status: SearchStatus::Pending,
            step: pending_step(),
        }
    }

    /// Merge the fields present on `event` into this job.
    ///
    /// Returns `true` if anything changed. The caller is responsible for
    /// matching `event.search_id` against `self.id`.
    pub fn apply(&mut self, event: &StatusEvent) -> bool {
        let mut changed = false;
        if let Some(status) = event.status {
            if self.status != status {
                self.status = status;
                changed = true;
            }
        }
        if let Some(step) = &event.step {
            if &self.step != step {
                self.step.clone_from(step);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_status_and_step_default_to_pending() {
        let job: SearchJob = serde_json::from_str(r#"{"id":"s1"}"#).unwrap();
        assert_eq!(job.status, SearchStatus::Pending);
        assert_eq!(job.step, PENDING_STEP);
        assert!(job.params.is_empty());
    }

    #[test]
    fn decodes_full_summary() {
        let job: SearchJob = serde_json::from_str(
            r#"{
                "id": "s7",
                "requesterId": "user-3",
                "params": {"industry": "dental", "radiusKm": 25},
                "createdAt": "2026-01-05T10:00:00Z",
                "status": "completed",
                "step": "done"
            }"#,
        )
        .unwrap();
        assert_eq!(job.requester_id.as_deref(), Some("user-3"));
        assert_eq!(job.params["radiusKm"], 25);
        assert!(job.created_at.is_some());
        assert_eq!(job.status, SearchStatus::Completed);
    }

    #[test]
    fn apply_merges_present_fields_only() {
        let mut job = SearchJob::pending("s1");
        job.step = "queued".into();

        let changed = job.apply(&StatusEvent {
            search_id: "s1".into(),
            status: Some(SearchStatus::Active),
            step: None,
        });
        assert!(changed);
        assert_eq!(job.status, SearchStatus::Active);
        assert_eq!(job.step, "queued");

        let changed = job.apply(&StatusEvent::new("s1", SearchStatus::Active, "scraping"));
        assert!(changed);
        assert_eq!(job.step, "scraping");
    }

    #[test]
    fn apply_same_values_reports_unchanged() {
        let mut job = SearchJob::pending("s1");
        let changed = job.apply(&StatusEvent::new("s1", SearchStatus::Pending, PENDING_STEP));
        assert!(!changed);
    }
}
