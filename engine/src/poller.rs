// Trigger poller: one fixed-interval loop detecting due time-jobs and
// changed watched files. Detected triggers are spawned onto the runtime
// so a slow or hung script never delays the next tick.

use crate::coordinator::ExecutionCoordinator;
use crate::models::TriggerSource;
use crate::store::JobStore;
use crate::watch::{FileWatchState, Observation};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Poller tuning knobs.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval_seconds: u64,
    /// Upper bound on scheduled jobs fired per tick.
    pub max_jobs_per_tick: usize,
    /// Ignore window after a run starts, within which mtime changes on the
    /// job's own watched path are treated as self-touches and not fired.
    pub self_touch_window_seconds: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            max_jobs_per_tick: 100,
            self_touch_window_seconds: 120,
        }
    }
}

/// What one tick detected and fired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub scheduled_fired: usize,
    pub files_fired: usize,
}

impl TickStats {
    pub fn total(&self) -> usize {
        self.scheduled_fired + self.files_fired
    }
}

pub struct TriggerPoller {
    settings: PollerSettings,
    store: Arc<dyn JobStore>,
    coordinator: ExecutionCoordinator,
    watch: FileWatchState,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl TriggerPoller {
    pub fn new(
        settings: PollerSettings,
        store: Arc<dyn JobStore>,
        coordinator: ExecutionCoordinator,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);
        Self {
            settings,
            store,
            coordinator,
            watch: FileWatchState::new(),
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request the polling loop to stop after the current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the polling loop until `stop` is called.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            poll_interval_seconds = self.settings.poll_interval_seconds,
            "Starting trigger poller"
        );

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.poll_interval_seconds,
        ));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = self.poll_once().await;
                    if stats.total() > 0 {
                        info!(
                            scheduled = stats.scheduled_fired,
                            files = stats.files_fired,
                            "Tick fired triggers"
                        );
                    } else {
                        debug!("Tick fired no triggers");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping trigger poller");
                    break;
                }
            }
        }
    }

    /// One full tick: the due-time scan, then the watched-file scan. Any
    /// per-job failure is logged and isolated; a store outage skips the
    /// affected scan until the next tick.
    pub async fn poll_once(&self) -> TickStats {
        let now = Utc::now();
        TickStats {
            scheduled_fired: self.scan_due(now).await,
            files_fired: self.scan_watches().await,
        }
    }

    async fn scan_due(&self, now: DateTime<Utc>) -> usize {
        let due = match self.store.due_jobs(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to query due jobs, retrying next tick");
                return 0;
            }
        };

        let mut fired = 0;
        for job in due.iter().take(self.settings.max_jobs_per_tick) {
            debug!(job_id = %job.id, job_name = %job.name, "Job is due");
            self.spawn_execute(job.id, TriggerSource::Scheduler);
            fired += 1;
        }
        fired
    }

    async fn scan_watches(&self) -> usize {
        let watched = match self.store.watched_jobs().await {
            Ok(watched) => watched,
            Err(e) => {
                error!(error = %e, "Failed to query watched jobs, retrying next tick");
                return 0;
            }
        };

        let mut fired = 0;
        for job in watched {
            let Some(path) = job.watched_path.clone() else {
                continue;
            };

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(job_id = %job.id, path = %path.display(), error = %e, "Failed to stat watched path");
                    continue;
                }
            };
            let mtime: DateTime<Utc> = match metadata.modified() {
                Ok(modified) => modified.into(),
                Err(e) => {
                    warn!(job_id = %job.id, path = %path.display(), error = %e, "Watched path has no modification time");
                    continue;
                }
            };

            match self.watch.observe(job.id, mtime, job.last_seen_mtime) {
                Observation::FirstSeen => {
                    // Baseline only: a pre-existing file is not a change.
                    self.persist_mtime(job.id, mtime).await;
                }
                Observation::Unchanged => {}
                Observation::Advanced { from } => {
                    // Persisted before the trigger fires so a crash between
                    // the two cannot re-fire on the same observation.
                    self.persist_mtime(job.id, mtime).await;

                    if self.is_self_touch(&job.last_run_at, mtime) {
                        debug!(
                            job_id = %job.id,
                            path = %path.display(),
                            "Change falls in the job's own run window, suppressed"
                        );
                        continue;
                    }

                    debug!(
                        job_id = %job.id,
                        path = %path.display(),
                        previous = %from,
                        observed = %mtime,
                        "Watched file changed"
                    );
                    self.spawn_execute(job.id, TriggerSource::File { path });
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Self-touch suppression: an mtime landing within the window after
    /// the job's last run start is attributed to the run itself.
    fn is_self_touch(&self, last_run_at: &Option<DateTime<Utc>>, mtime: DateTime<Utc>) -> bool {
        let Some(last_run) = last_run_at else {
            return false;
        };
        let window = Duration::seconds(self.settings.self_touch_window_seconds as i64);
        mtime >= *last_run && mtime <= *last_run + window
    }

    async fn persist_mtime(&self, job_id: uuid::Uuid, mtime: DateTime<Utc>) {
        if let Err(e) = self.store.set_last_seen_mtime(job_id, mtime).await {
            warn!(job_id = %job_id, error = %e, "Failed to persist last seen mtime");
        }
    }

    fn spawn_execute(&self, job_id: uuid::Uuid, source: TriggerSource) {
        let execution = self.coordinator.execute(job_id, source);
        tokio::spawn(async move {
            match execution.await {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    debug!(job_id = %job_id, error = %e, "Execution deferred, poller retries next tick")
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Execution was not started"),
            }
        });
    }
}
