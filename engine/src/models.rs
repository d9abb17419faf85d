use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// Helper functions for Tz serialization
fn serialize_tz<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tz.to_string())
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Tz::from_str(&s).map_err(serde::de::Error::custom)
}

// ============================================================================
// Job Models
// ============================================================================

/// Job is the central schedulable entity: a script reference bound to an
/// owner, plus the mutable scheduling fields the engine maintains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Identity of the thread/user that owns and may trigger this job.
    pub owner_id: String,
    pub name: String,
    /// Opaque reference to executable content; resolved by the script runtime.
    pub script_ref: String,
    pub enabled: bool,
    /// Next scheduled fire time; only meaningful for scheduler-polled jobs.
    pub due_time: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    /// Filesystem path polled for modification-time changes.
    pub watched_path: Option<PathBuf>,
    /// Last modification time observed for `watched_path`; never regresses.
    pub last_seen_mtime: Option<DateTime<Utc>>,
    /// Jobs to trigger when this job completes. The graph formed by these
    /// edges is kept acyclic at edge-creation time.
    pub dependents: Vec<Uuid>,
    /// HMAC key for webhook triggering; `None` means no webhook provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub lease: Option<ExecutionLease>,
    /// Soft-delete marker; a tombstoned job stays addressable so the
    /// dependents graph remains consistent.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job with no triggers provisioned.
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>, script_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            script_ref: script_ref.into(),
            enabled: true,
            due_time: None,
            recurrence: None,
            watched_path: None,
            last_seen_mtime: None,
            dependents: Vec::new(),
            webhook_secret: None,
            last_run_at: None,
            lease: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether any trigger source may fire this job.
    pub fn is_active(&self) -> bool {
        self.enabled && self.deleted_at.is_none()
    }
}

/// Time-bounded ownership claim preventing concurrent duplicate execution
/// of the same job. Persisted in the job store so that triggers arriving
/// from independent processes observe the same claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionLease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl ExecutionLease {
    pub fn new(holder: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            holder: holder.into(),
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Recurrence rule: how to compute a job's next due time after each
/// scheduled run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    Cron {
        expression: String,
        #[serde(serialize_with = "serialize_tz", deserialize_with = "deserialize_tz")]
        timezone: Tz,
    },
    Every {
        interval_seconds: u32,
    },
}

// ============================================================================
// Trigger Models
// ============================================================================

/// TriggerSource tags every execution with its origin. All five sources
/// converge on the same execution path; the tag exists for audit, for the
/// recurrence-advance rule (scheduler only) and for chain propagation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSource {
    /// Fired by the polling loop because `due_time` elapsed.
    Scheduler,
    /// Inbound webhook call, validated against the job's shared secret.
    Webhook { endpoint: String },
    /// Watched-file modification detected by the polling loop.
    File { path: PathBuf },
    /// Direct invocation by the owner; conversational commands carry the
    /// session they originated from.
    Manual {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Fired because a parent job completed.
    Completion { parent_id: Uuid },
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Scheduler => write!(f, "scheduler"),
            TriggerSource::Webhook { .. } => write!(f, "webhook"),
            TriggerSource::File { .. } => write!(f, "file"),
            TriggerSource::Manual { .. } => write!(f, "manual"),
            TriggerSource::Completion { .. } => write!(f, "completion"),
        }
    }
}

// ============================================================================
// Run Records
// ============================================================================

/// RunStatus tracks a single execution from start to terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Audit record for one execution of a job, whatever its trigger source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub source: TriggerSource,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Output artifact reference, if the script produced one.
    pub output: Option<String>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn started(job_id: Uuid, source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            source,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
        }
    }
}
