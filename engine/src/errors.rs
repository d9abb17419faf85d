// Error handling framework

use thiserror::Error;
use uuid::Uuid;

/// Recurrence-rule errors
#[derive(Error, Debug)]
pub enum RecurrenceError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid recurrence configuration: {0}")]
    InvalidConfiguration(String),
}

/// Job store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Script runner errors. These are captured by the coordinator and reported
/// through the notifier; they never surface as engine faults.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Script execution failed: {0}")]
    Failed(String),

    #[error("Script execution timed out after {0} seconds")]
    Timeout(u64),
}

/// Engine-level errors returned from trigger entry points and the
/// execution funnel.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Caller '{caller}' is not authorized to trigger job {job_id}")]
    Unauthorized { job_id: Uuid, caller: String },

    #[error("Invalid webhook signature for job {0}")]
    InvalidSignature(Uuid),

    #[error("Job {0} already has a run in progress")]
    AlreadyRunning(Uuid),

    #[error("Execution slots exhausted, retry later")]
    Saturated,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Dependency edge {from} -> {to} would create a cycle")]
    CycleRejected { from: Uuid, to: Uuid },

    #[error(transparent)]
    InvalidRecurrence(#[from] RecurrenceError),
}

impl EngineError {
    /// Whether the caller may simply retry later without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Saturated | EngineError::StoreUnavailable(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::RunNotFound(id) => EngineError::StoreUnavailable(format!("run {} missing", id)),
            StoreError::Unavailable(reason) => EngineError::StoreUnavailable(reason),
        }
    }
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Unauthorized { .. } | EngineError::InvalidSignature(_) => "UNAUTHORIZED",
            EngineError::AlreadyRunning(_) => "ALREADY_RUNNING",
            EngineError::Saturated => "SATURATED",
            EngineError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            EngineError::CycleRejected { .. } => "CYCLE_REJECTED",
            EngineError::InvalidRecurrence(_) => "INVALID_RECURRENCE",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<RecurrenceError> for ApiError {
    fn from(err: RecurrenceError) -> Self {
        ApiError::new("INVALID_RECURRENCE", err.to_string())
    }
}
