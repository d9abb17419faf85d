// File-watch bookkeeping for the trigger poller.
//
// Polling-based watching trades latency for simplicity: staleness is
// bounded by the poll interval. An OS-level notification mechanism could
// replace the poller's stat calls without touching this bookkeeping.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Result of recording one observation of a watched path's mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No previous observation existed; this one becomes the baseline and
    /// must not fire a trigger (pre-existing files are not "changes").
    FirstSeen,
    Unchanged,
    /// The mtime advanced past the previous observation.
    Advanced { from: DateTime<Utc> },
}

/// Per-job last-observed modification times. Read and written only by the
/// trigger poller; the persisted copy in the job store seeds this map
/// after a restart.
#[derive(Debug, Default)]
pub struct FileWatchState {
    seen: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl FileWatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `mtime` for `job_id` and classify the observation.
    ///
    /// `persisted` is the store's copy of the last seen mtime, consulted
    /// only when this map has no entry yet. The recorded value never
    /// regresses: an older mtime (e.g. a file restored from backup) is
    /// classified `Unchanged` and the newer baseline is kept.
    pub fn observe(
        &self,
        job_id: Uuid,
        mtime: DateTime<Utc>,
        persisted: Option<DateTime<Utc>>,
    ) -> Observation {
        let mut seen = self.seen.lock().expect("watch state lock poisoned");
        let previous = seen.get(&job_id).copied().or(persisted);
        match previous {
            None => {
                seen.insert(job_id, mtime);
                Observation::FirstSeen
            }
            Some(prev) if mtime > prev => {
                seen.insert(job_id, mtime);
                Observation::Advanced { from: prev }
            }
            Some(prev) => {
                seen.insert(job_id, prev);
                Observation::Unchanged
            }
        }
    }

    /// Drop bookkeeping for a job whose watch was removed.
    pub fn forget(&self, job_id: Uuid) {
        self.seen
            .lock()
            .expect("watch state lock poisoned")
            .remove(&job_id);
    }

    pub fn last_seen(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.seen
            .lock()
            .expect("watch state lock poisoned")
            .get(&job_id)
            .copied()
    }
}
