//! Lifecycle status of a search job.

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a search job.
///
/// The workflow publisher only ever moves a job forward:
/// `pending -> active -> {completed | failed}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl SearchStatus {
    /// Wire name of the status (`"pending"`, `"active"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            SearchStatus::Pending => "pending",
            SearchStatus::Active => "active",
            SearchStatus::Completed => "completed",
            SearchStatus::Failed => "failed",
        }
    }

    /// `true` once the job can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SearchStatus::Completed | SearchStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            SearchStatus::Pending => 0,
            SearchStatus::Active => 1,
            SearchStatus::Completed | SearchStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Repeating the current non-terminal status is allowed (a new `step`
    /// within the same stage). Nothing leaves a terminal status.
    pub fn can_advance_to(self, next: SearchStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
