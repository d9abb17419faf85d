// Job store boundary.
//
// The engine owns none of the storage machinery; it talks to a JobStore
// collaborator through this trait. MemoryJobStore is the reference
// implementation used by the daemon and the test suites; a persistent
// backend implements the same contract, most importantly the atomic
// compare-and-set semantics of `try_acquire_lease`.

pub mod memory;

pub use memory::MemoryJobStore;

use crate::errors::StoreError;
use crate::models::{Job, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Replace a job's definition fields. Scheduling fields mutated through
    /// the dedicated setters below are preserved server-side.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError>;

    /// Delete a job. While another job still lists the id among its
    /// dependents the record is tombstoned (disabled + `deleted_at`) rather
    /// than removed, keeping the dependency graph consistent.
    async fn soft_delete_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// Active jobs whose `due_time` is at or before `now`.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// Active jobs with a watched path.
    async fn watched_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn dependents_of(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Persist a dependency edge. Cycle validation happens in the chain
    /// resolver before this is called; the store only records the edge.
    async fn add_dependent(&self, from: Uuid, to: Uuid) -> Result<(), StoreError>;

    async fn set_due_time(&self, id: Uuid, due: Option<DateTime<Utc>>) -> Result<(), StoreError>;

    async fn set_last_seen_mtime(&self, id: Uuid, mtime: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_last_run_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Atomically claim the job's execution lease. Returns `Ok(true)` iff
    /// no lease existed or the existing lease had expired; `Ok(false)`
    /// means another holder's unexpired lease is in place.
    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Release the lease if (and only if) `holder` still owns it.
    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), StoreError>;

    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Run history for a job, most recent first.
    async fn runs_for(&self, job_id: Uuid) -> Result<Vec<RunRecord>, StoreError>;
}
