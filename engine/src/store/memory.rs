// In-memory JobStore implementation.

use crate::errors::StoreError;
use crate::models::{ExecutionLease, Job, RunRecord, RunStatus};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    runs: HashMap<Uuid, RunRecord>,
}

/// Reference JobStore keeping all records behind one RwLock. Lease
/// compare-and-set is atomic because every mutation holds the write lock
/// for its whole read-check-write sequence.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let existing = inner.jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
        let mut updated = job.clone();
        // Scheduling state is owned by the engine components, not the caller.
        updated.lease = existing.lease.clone();
        updated.last_run_at = existing.last_run_at;
        updated.last_seen_mtime = existing.last_seen_mtime;
        updated.updated_at = Utc::now();
        *existing = updated;
        Ok(())
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.enabled = enabled;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete_job(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let referenced = inner
            .jobs
            .values()
            .any(|job| job.id != id && job.dependents.contains(&id));
        if referenced {
            let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            job.enabled = false;
            job.deleted_at = Some(Utc::now());
            job.updated_at = Utc::now();
        } else {
            inner.jobs.remove(&id);
        }
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.is_active())
            .filter(|job| job.due_time.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.due_time);
        Ok(due)
    }

    async fn watched_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.is_active() && job.watched_path.is_some())
            .cloned()
            .collect())
    }

    async fn dependents_of(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.read().await;
        let job = inner.jobs.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(job.dependents.clone())
    }

    async fn add_dependent(&self, from: Uuid, to: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&to) {
            return Err(StoreError::NotFound(to));
        }
        let job = inner.jobs.get_mut(&from).ok_or(StoreError::NotFound(from))?;
        if !job.dependents.contains(&to) {
            job.dependents.push(to);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_due_time(&self, id: Uuid, due: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.due_time = due;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_last_seen_mtime(&self, id: Uuid, mtime: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        // Monotonic non-decreasing.
        if job.last_seen_mtime.is_none_or(|seen| mtime > seen) {
            job.last_seen_mtime = Some(mtime);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_last_run_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.last_run_at = Some(at);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match &job.lease {
            Some(lease) if !lease.is_expired(now) => Ok(false),
            _ => {
                job.lease = Some(ExecutionLease::new(holder, now, ttl));
                job.updated_at = now;
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.lease.as_ref().is_some_and(|lease| lease.holder == holder) {
            job.lease = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner.runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.output = output;
        run.error = error;
        Ok(())
    }

    async fn runs_for(&self, job_id: Uuid) -> Result<Vec<RunRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut runs: Vec<RunRecord> = inner
            .runs
            .values()
            .filter(|run| run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}
