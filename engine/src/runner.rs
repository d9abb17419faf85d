// Script runtime boundary.

use crate::errors::RunnerError;
use async_trait::async_trait;
use uuid::Uuid;

/// Identity scope a script executes under. The runner must never operate
/// with an identity other than the owning job's, so the context carries
/// the owner explicitly rather than leaving it ambient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub job_id: Uuid,
    pub owner_id: String,
}

/// Output of a successful script run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Optional output artifact (or a reference to one) to forward to the
    /// notification collaborator.
    pub content: Option<String>,
}

/// External script-execution collaborator. The sandboxing, resource limits
/// and timeout enforcement live on the other side of this trait; the
/// engine only observes success or failure.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script_ref: &str, ctx: &ExecutionContext) -> Result<RunOutput, RunnerError>;
}
