use indexmap::IndexMap;
use searchcast_core::types::SearchId;
use searchcast_core::{SearchJob, StatusEvent};

/// Result of merging one status event into the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The job exists and its status or step changed.
    Updated,
    /// The job exists and already had these values.
    Unchanged,
    /// No job with this id is mirrored; the event was dropped.
    UnknownJob,
}

/// Local copy of search job summaries, in bulk-fetch order.
///
/// Jobs only enter the mirror through [`seed`](Self::seed); a status event
/// for an id that is not mirrored never creates one.
#[derive(Debug, Clone, Default)]
pub struct JobMirror {
    jobs: IndexMap<SearchId, SearchJob>,
}

impl JobMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mirror with an authoritative page of jobs.
    pub fn seed(&mut self, jobs: impl IntoIterator<Item = SearchJob>) {
        self.jobs = jobs.into_iter().map(|job| (job.id.clone(), job)).collect();
    }

    /// Merge `event` into the matching job.
    pub fn apply(&mut self, event: &StatusEvent) -> MergeOutcome {
        let Some(job) = self.jobs.get_mut(&event.search_id) else {
            tracing::debug!(search_id = %event.search_id, "Status update for unmirrored job dropped");
            return MergeOutcome::UnknownJob;
        };

        if let Some(next) = event.status {
            if next != job.status && !job.status.can_advance_to(next) {
                // Applied anyway: the publisher owns the state machine.
                tracing::warn!(
                    search_id = %job.id,
                    from = %job.status,
                    to = %next,
                    "Status update moves job backwards",
                );
            }
        }

        if job.apply(event) {
            MergeOutcome::Updated
        } else {
            MergeOutcome::Unchanged
        }
    }

    pub fn get(&self, id: &str) -> Option<&SearchJob> {
        self.jobs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
