// Execution coordinator: the single funnel every trigger source calls
// into, so that scheduler ticks, webhooks, file changes, manual commands
// and completion chains all share identical execution semantics.

use crate::chain::{ChainPolicy, ChainResolver};
use crate::errors::EngineError;
use crate::models::{Job, RunRecord, RunStatus, TriggerSource};
use crate::notify::Notifier;
use crate::recurrence::{self, MissedPolicy};
use crate::runner::{ExecutionContext, ScriptRunner};
use crate::store::JobStore;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happens to triggers arriving while all execution slots are busy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse immediately with a retryable `Saturated` error.
    Reject,
    /// Wait for a slot, with at most `capacity` triggers waiting; beyond
    /// that, refuse with `Saturated`.
    Queue { capacity: usize },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Reject
    }
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub lease_ttl_seconds: u64,
    pub max_concurrent_executions: usize,
    pub overflow: OverflowPolicy,
    pub chain_policy: ChainPolicy,
    pub missed_policy: MissedPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: 300,
            max_concurrent_executions: 8,
            overflow: OverflowPolicy::default(),
            chain_policy: ChainPolicy::default(),
            missed_policy: MissedPolicy::default(),
        }
    }
}

/// Result of funnelling a trigger through `execute`.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The script ran; the record carries its terminal status and output.
    Ran(RunRecord),
    /// The job is disabled or tombstoned; triggers are a successful no-op.
    SkippedDisabled,
}

struct CoordinatorInner {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn ScriptRunner>,
    notifier: Arc<dyn Notifier>,
    chain: ChainResolver,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    overflow: OverflowPolicy,
    max_concurrent: usize,
    lease_ttl: Duration,
    missed_policy: MissedPolicy,
    /// Lease holder identity for this engine instance.
    holder_id: String,
}

/// Cheaply clonable handle; every clone funnels into the same semaphore,
/// lease holder identity and collaborator set.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn ScriptRunner>,
        notifier: Arc<dyn Notifier>,
        settings: CoordinatorSettings,
    ) -> Self {
        let chain = ChainResolver::new(Arc::clone(&store), settings.chain_policy);
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                runner,
                notifier,
                chain,
                semaphore: Arc::new(Semaphore::new(settings.max_concurrent_executions)),
                waiting: AtomicUsize::new(0),
                overflow: settings.overflow,
                max_concurrent: settings.max_concurrent_executions,
                lease_ttl: Duration::seconds(settings.lease_ttl_seconds as i64),
                missed_policy: settings.missed_policy,
                holder_id: format!("engine-{}", Uuid::new_v4()),
            }),
        }
    }

    /// The chain resolver guarding this coordinator's dependents graph.
    /// Edge creation goes through here so every edge is cycle-checked.
    pub fn chain(&self) -> &ChainResolver {
        &self.inner.chain
    }

    /// Execute a job on behalf of any trigger source.
    ///
    /// Returns a boxed, detachable future so completion chaining can
    /// re-enter the funnel from a spawned task without a recursive future
    /// type.
    pub fn execute(
        &self,
        job_id: Uuid,
        source: TriggerSource,
    ) -> BoxFuture<'static, Result<ExecutionOutcome, EngineError>> {
        let this = self.clone();
        async move { this.execute_inner(job_id, source).await }.boxed()
    }

    #[tracing::instrument(skip(self), fields(job_id = %job_id, source = %source))]
    async fn execute_inner(
        &self,
        job_id: Uuid,
        source: TriggerSource,
    ) -> Result<ExecutionOutcome, EngineError> {
        let inner = &self.inner;

        let job = inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::NotFound(job_id))?;

        if !job.is_active() {
            debug!("Job is disabled, trigger is a no-op");
            return Ok(ExecutionOutcome::SkippedDisabled);
        }

        let _permit = self.admit().await?;
        telemetry::update_in_flight(inner.max_concurrent - inner.semaphore.available_permits());

        let now = Utc::now();
        let acquired = inner
            .store
            .try_acquire_lease(job_id, &inner.holder_id, inner.lease_ttl, now)
            .await?;
        if !acquired {
            debug!("Execution lease is held, refusing duplicate run");
            return Err(EngineError::AlreadyRunning(job_id));
        }

        let outcome = self.run_leased(&job, source).await;

        if let Err(e) = inner.store.release_lease(job_id, &inner.holder_id).await {
            warn!(error = %e, "Failed to release execution lease");
        }
        telemetry::update_in_flight(inner.max_concurrent - inner.semaphore.available_permits());

        outcome
    }

    /// Everything that happens while the lease is held. Split out so the
    /// caller releases the lease on every path.
    async fn run_leased(
        &self,
        job: &Job,
        source: TriggerSource,
    ) -> Result<ExecutionOutcome, EngineError> {
        let inner = &self.inner;
        telemetry::record_trigger(&source);

        let mut run = RunRecord::started(job.id, source);
        inner.store.record_run(&run).await?;
        if let Err(e) = inner.store.set_last_run_at(job.id, run.started_at).await {
            warn!(error = %e, "Failed to update last_run_at");
        }

        // The script runtime only ever sees the owning identity.
        let ctx = ExecutionContext {
            job_id: job.id,
            owner_id: job.owner_id.clone(),
        };

        info!(owner_id = %ctx.owner_id, script_ref = %job.script_ref, "Executing job");
        let started = std::time::Instant::now();
        let result = inner.runner.run(&job.script_ref, &ctx).await;
        let duration = started.elapsed().as_secs_f64();
        telemetry::record_run_duration(&job.id, duration);

        let (status, output, error) = match result {
            Ok(out) => (RunStatus::Success, out.content, None),
            Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
        };
        match status {
            RunStatus::Success => telemetry::record_run_success(&job.id),
            _ => telemetry::record_run_failure(&job.id),
        }

        if let Err(e) = inner
            .store
            .finish_run(run.id, status, output.clone(), error.clone())
            .await
        {
            warn!(error = %e, "Failed to persist run outcome");
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.output = output.clone();
        run.error = error.clone();

        let body = match status {
            RunStatus::Success => output.as_deref(),
            _ => error.as_deref(),
        };
        if let Err(e) = inner.notifier.notify(job.id, status, body).await {
            warn!(error = %e, "Notification delivery failed");
        }

        if matches!(run.source, TriggerSource::Scheduler) {
            self.advance_schedule(job, run.started_at).await;
        }

        inner.chain.on_complete(self, job.id, status).await;

        Ok(ExecutionOutcome::Ran(run))
    }

    /// Admit this trigger against the global concurrency limit.
    async fn admit(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        let inner = &self.inner;
        match inner.overflow {
            OverflowPolicy::Reject => Arc::clone(&inner.semaphore)
                .try_acquire_owned()
                .map_err(|_| EngineError::Saturated),
            OverflowPolicy::Queue { capacity } => {
                if inner.waiting.fetch_add(1, Ordering::SeqCst) >= capacity {
                    inner.waiting.fetch_sub(1, Ordering::SeqCst);
                    return Err(EngineError::Saturated);
                }
                let permit = Arc::clone(&inner.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::Saturated);
                inner.waiting.fetch_sub(1, Ordering::SeqCst);
                permit
            }
        }
    }

    /// Recompute the due time after a scheduler-sourced run. Anchored to
    /// the due time that fired the run, so occurrences stay on their grid;
    /// a one-shot due time is cleared instead.
    async fn advance_schedule(&self, job: &Job, fallback_anchor: DateTime<Utc>) {
        let inner = &self.inner;
        let Some(rule) = &job.recurrence else {
            if let Err(e) = inner.store.set_due_time(job.id, None).await {
                warn!(error = %e, "Failed to clear one-shot due time");
            }
            return;
        };

        let anchor = job.due_time.unwrap_or(fallback_anchor);
        match recurrence::next_due(rule, anchor, Utc::now(), inner.missed_policy) {
            Ok(next) => {
                if let Err(e) = inner.store.set_due_time(job.id, next).await {
                    warn!(error = %e, "Failed to persist next due time");
                } else if let Some(next) = next {
                    debug!(next_due = %next, "Schedule advanced");
                }
            }
            Err(e) => {
                warn!(error = %e, "Recurrence advance failed, schedule left unchanged");
            }
        }
    }
}
