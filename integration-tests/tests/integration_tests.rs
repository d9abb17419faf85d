// End-to-end tests across poller, coordinator, dispatcher and chain
// resolver, against the in-memory store and fake collaborators.

use chrono::{Duration, Utc};
use engine::coordinator::{CoordinatorSettings, ExecutionCoordinator};
use engine::dispatcher::{EventDispatcher, TriggerAck};
use engine::errors::{RunnerError, StoreError};
use engine::models::{Job, Recurrence, RunRecord, RunStatus, TriggerSource};
use engine::notify::LogNotifier;
use engine::poller::{PollerSettings, TriggerPoller};
use engine::runner::{ExecutionContext, RunOutput, ScriptRunner};
use engine::store::{JobStore, MemoryJobStore};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// Script runner fake: records every invocation, optionally blocks on a
/// gate so tests can hold a run in flight.
struct FakeRunner {
    calls: Mutex<Vec<ExecutionContext>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeRunner {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ScriptRunner for FakeRunner {
    async fn run(&self, _script_ref: &str, ctx: &ExecutionContext) -> Result<RunOutput, RunnerError> {
        self.calls.lock().await.push(ctx.clone());
        if let Some(gate) = &self.gate {
            let permit = Arc::clone(gate).acquire_owned().await.expect("gate closed");
            permit.forget();
        }
        Ok(RunOutput {
            content: Some("ok".to_string()),
        })
    }
}

/// JobStore wrapper that can simulate a transient outage on the queries
/// the poller issues each tick.
struct OutageStore {
    inner: MemoryJobStore,
    down: AtomicBool,
}

impl OutageStore {
    fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(),
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for OutageStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.check()?;
        self.inner.get_job(id).await
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.update_job(job).await
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        self.inner.set_enabled(id, enabled).await
    }

    async fn soft_delete_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.soft_delete_job(id).await
    }

    async fn due_jobs(&self, now: chrono::DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        self.check()?;
        self.inner.due_jobs(now).await
    }

    async fn watched_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.check()?;
        self.inner.watched_jobs().await
    }

    async fn dependents_of(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.inner.dependents_of(id).await
    }

    async fn add_dependent(&self, from: Uuid, to: Uuid) -> Result<(), StoreError> {
        self.inner.add_dependent(from, to).await
    }

    async fn set_due_time(&self, id: Uuid, due: Option<chrono::DateTime<Utc>>) -> Result<(), StoreError> {
        self.inner.set_due_time(id, due).await
    }

    async fn set_last_seen_mtime(&self, id: Uuid, mtime: chrono::DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.set_last_seen_mtime(id, mtime).await
    }

    async fn set_last_run_at(&self, id: Uuid, at: chrono::DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.set_last_run_at(id, at).await
    }

    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.try_acquire_lease(id, holder, ttl, now).await
    }

    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), StoreError> {
        self.inner.release_lease(id, holder).await
    }

    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.inner.record_run(run).await
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.finish_run(run_id, status, output, error).await
    }

    async fn runs_for(&self, job_id: Uuid) -> Result<Vec<RunRecord>, StoreError> {
        self.inner.runs_for(job_id).await
    }
}

struct Harness {
    store: Arc<dyn JobStore>,
    runner: Arc<FakeRunner>,
    coordinator: ExecutionCoordinator,
    dispatcher: EventDispatcher,
    poller: TriggerPoller,
}

fn harness_with(store: Arc<dyn JobStore>, runner: Arc<FakeRunner>) -> Harness {
    let coordinator = ExecutionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&runner) as Arc<dyn ScriptRunner>,
        Arc::new(LogNotifier),
        CoordinatorSettings::default(),
    );
    let dispatcher = EventDispatcher::new(Arc::clone(&store), coordinator.clone());
    let poller = TriggerPoller::new(
        PollerSettings::default(),
        Arc::clone(&store),
        coordinator.clone(),
    );
    Harness {
        store,
        runner,
        coordinator,
        dispatcher,
        poller,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryJobStore::new()), Arc::new(FakeRunner::new()))
}

/// Wait for `expected` finished runs of a job, with a hard timeout.
async fn wait_for_finished_runs(store: &dyn JobStore, job_id: Uuid, expected: usize) -> Vec<RunRecord> {
    let deadline = std::time::Instant::now() + StdDuration::from_secs(3);
    loop {
        let runs = store.runs_for(job_id).await.expect("store available");
        let finished: Vec<RunRecord> = runs
            .into_iter()
            .filter(|run| run.finished_at.is_some())
            .collect();
        if finished.len() >= expected {
            return finished;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for {} finished runs of {}",
            expected,
            job_id
        );
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(100)).await;
}

/// A due, enabled, 10-minute-recurring job: the next tick executes it
/// exactly once, after which the due time sits one interval in the future
/// and the lease is released.
#[tokio::test]
async fn test_scheduled_recurring_job_lifecycle() {
    let h = harness();

    let mut job = Job::new("owner-1", "heartbeat", "scripts/heartbeat");
    let fired_due = Utc::now() - Duration::seconds(1);
    job.due_time = Some(fired_due);
    job.recurrence = Some(Recurrence::Every {
        interval_seconds: 600,
    });
    h.store.create_job(&job).await.unwrap();

    let stats = h.poller.poll_once().await;
    assert_eq!(stats.scheduled_fired, 1);

    let runs = wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].source, TriggerSource::Scheduler);

    let stored = h.store.get_job(job.id).await.unwrap().unwrap();
    let next_due = stored.due_time.unwrap();
    assert!(next_due > Utc::now());
    assert!(next_due <= Utc::now() + Duration::seconds(600));
    assert_eq!((next_due - fired_due).num_seconds() % 600, 0);
    assert!(stored.lease.is_none());

    // The rescheduled job is quiet on the following tick.
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.scheduled_fired, 0);
    settle().await;
    assert_eq!(h.runner.call_count().await, 1);
}

/// A 5-minute recurrence left unpolled for an hour yields one run and one
/// future occurrence, not a backlog.
#[tokio::test]
async fn test_missed_occurrences_collapse_to_one_run() {
    let h = harness();

    let mut job = Job::new("owner-1", "every-five", "scripts/five");
    job.due_time = Some(Utc::now() - Duration::hours(1));
    job.recurrence = Some(Recurrence::Every {
        interval_seconds: 300,
    });
    h.store.create_job(&job).await.unwrap();

    h.poller.poll_once().await;
    wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;

    let stored = h.store.get_job(job.id).await.unwrap().unwrap();
    assert!(stored.due_time.unwrap() > Utc::now());

    let stats = h.poller.poll_once().await;
    assert_eq!(stats.scheduled_fired, 0);
    settle().await;
    assert_eq!(h.runner.call_count().await, 1);
}

/// Completion chaining: A fans out to B and C, B continues to D. Each
/// dependent runs exactly once with a completion source naming its parent.
#[tokio::test]
async fn test_chain_fans_out_and_propagates() {
    let h = harness();

    let a = Job::new("owner-1", "a", "scripts/a");
    let b = Job::new("owner-1", "b", "scripts/b");
    let c = Job::new("owner-1", "c", "scripts/c");
    let d = Job::new("owner-1", "d", "scripts/d");
    for job in [&a, &b, &c, &d] {
        h.store.create_job(job).await.unwrap();
    }
    h.coordinator.chain().add_dependency(a.id, b.id).await.unwrap();
    h.coordinator.chain().add_dependency(a.id, c.id).await.unwrap();
    h.coordinator.chain().add_dependency(b.id, d.id).await.unwrap();

    let ack = h.dispatcher.trigger_manual(a.id, "owner-1").await.unwrap();
    assert_eq!(ack, TriggerAck::Accepted);

    let runs_b = wait_for_finished_runs(h.store.as_ref(), b.id, 1).await;
    let runs_c = wait_for_finished_runs(h.store.as_ref(), c.id, 1).await;
    let runs_d = wait_for_finished_runs(h.store.as_ref(), d.id, 1).await;

    assert_eq!(runs_b[0].source, TriggerSource::Completion { parent_id: a.id });
    assert_eq!(runs_c[0].source, TriggerSource::Completion { parent_id: a.id });
    assert_eq!(runs_d[0].source, TriggerSource::Completion { parent_id: b.id });

    settle().await;
    // A, B, C, D exactly once each: propagation stops at the leaves.
    assert_eq!(h.runner.call_count().await, 4);
}

/// Two simultaneous triggers on one job produce one script invocation;
/// the loser observes the lease.
#[tokio::test]
async fn test_simultaneous_triggers_execute_once() {
    let gate = Arc::new(Semaphore::new(0));
    let runner = Arc::new(FakeRunner::gated(Arc::clone(&gate)));
    let h = harness_with(Arc::new(MemoryJobStore::new()), runner);

    let job = Job::new("owner-1", "contended", "scripts/slow");
    h.store.create_job(&job).await.unwrap();

    let first = tokio::spawn(h.coordinator.execute(job.id, TriggerSource::Scheduler));
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let second = h
        .coordinator
        .execute(
            job.id,
            TriggerSource::Manual {
                user_id: "owner-1".to_string(),
                session_id: None,
            },
        )
        .await;
    assert!(matches!(
        second,
        Err(engine::errors::EngineError::AlreadyRunning(_))
    ));

    gate.add_permits(1);
    first.await.unwrap().unwrap();
    assert_eq!(h.runner.call_count().await, 1);
}

/// File watching end to end: baseline tick, external change fires once,
/// unchanged ticks stay quiet.
#[tokio::test]
async fn test_file_watch_detects_changes_once() {
    let h = harness();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "v1").unwrap();

    let mut job = Job::new("owner-1", "ingest", "scripts/ingest");
    job.watched_path = Some(file.path().to_path_buf());
    h.store.create_job(&job).await.unwrap();

    // Baseline.
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.files_fired, 0);

    writeln!(file, "v2").unwrap();
    file.flush().unwrap();

    let stats = h.poller.poll_once().await;
    assert_eq!(stats.files_fired, 1);
    let runs = wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;
    assert!(matches!(runs[0].source, TriggerSource::File { .. }));

    // Idempotent across unchanged ticks.
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.files_fired, 0);
    settle().await;
    assert_eq!(h.runner.call_count().await, 1);
}

/// Disabling a job mid-run does not abort the run; it only prevents
/// future triggering.
#[tokio::test]
async fn test_disable_mid_run_is_cooperative() {
    let gate = Arc::new(Semaphore::new(0));
    let runner = Arc::new(FakeRunner::gated(Arc::clone(&gate)));
    let h = harness_with(Arc::new(MemoryJobStore::new()), runner);

    let mut job = Job::new("owner-1", "long-haul", "scripts/long");
    job.due_time = Some(Utc::now() - Duration::seconds(1));
    job.recurrence = Some(Recurrence::Every {
        interval_seconds: 600,
    });
    h.store.create_job(&job).await.unwrap();

    let in_flight = tokio::spawn(h.coordinator.execute(job.id, TriggerSource::Scheduler));
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    // Disable while the script is still running.
    h.store.set_enabled(job.id, false).await.unwrap();
    gate.add_permits(1);

    // The in-flight run completes normally.
    let outcome = in_flight.await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        engine::coordinator::ExecutionOutcome::Ran(_)
    ));
    let runs = wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;
    assert_eq!(runs[0].status, RunStatus::Success);

    // But nothing fires it any more.
    let ack = h.dispatcher.trigger_manual(job.id, "owner-1").await.unwrap();
    assert_eq!(ack, TriggerAck::NoopDisabled);
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.total(), 0);
    settle().await;
    assert_eq!(h.runner.call_count().await, 1);
}

/// A store outage skips the tick and recovers on the next one, with no
/// operator intervention and no lost job.
#[tokio::test]
async fn test_store_outage_is_retried_next_tick() {
    let outage_store = Arc::new(OutageStore::new());
    let runner = Arc::new(FakeRunner::new());
    let h = harness_with(
        Arc::clone(&outage_store) as Arc<dyn JobStore>,
        Arc::clone(&runner),
    );

    let mut job = Job::new("owner-1", "survivor", "scripts/survive");
    job.due_time = Some(Utc::now() - Duration::seconds(1));
    h.store.create_job(&job).await.unwrap();

    outage_store.set_down(true);
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.total(), 0);

    outage_store.set_down(false);
    let stats = h.poller.poll_once().await;
    assert_eq!(stats.scheduled_fired, 1);
    wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;
    assert_eq!(h.runner.call_count().await, 1);
}

/// Webhook path end to end: a signed request is accepted and the run is
/// attributed to the webhook source; a tampered body is rejected.
#[tokio::test]
async fn test_webhook_trigger_end_to_end() {
    let h = harness();

    let mut job = Job::new("owner-1", "hooked", "scripts/hook");
    let secret = engine::webhook::generate_webhook_secret();
    job.webhook_secret = Some(secret.clone());
    h.store.create_job(&job).await.unwrap();

    let body = br#"{"event":"push"}"#;
    let signature = engine::webhook::sign_payload(body, &secret);

    let ack = h
        .dispatcher
        .trigger_webhook(job.id, "/api/hooks/ci", body, &signature)
        .await
        .unwrap();
    assert_eq!(ack, TriggerAck::Accepted);
    let runs = wait_for_finished_runs(h.store.as_ref(), job.id, 1).await;
    assert!(matches!(runs[0].source, TriggerSource::Webhook { .. }));

    let tampered = h
        .dispatcher
        .trigger_webhook(job.id, "/api/hooks/ci", b"{\"event\":\"forged\"}", &signature)
        .await;
    assert!(matches!(
        tampered,
        Err(engine::errors::EngineError::InvalidSignature(_))
    ));
}
