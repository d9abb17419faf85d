// Process-spawning script runner.
//
// Boundary implementation of the script-execution collaborator: the
// script reference is handed to a shell, with the owning identity pinned
// in the child's environment. Sandboxing and resource isolation belong to
// the runtime deployed behind this interface in production.

use async_trait::async_trait;
use engine::errors::RunnerError;
use engine::runner::{ExecutionContext, RunOutput, ScriptRunner};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    #[tracing::instrument(skip(self), fields(job_id = %ctx.job_id, owner_id = %ctx.owner_id))]
    async fn run(&self, script_ref: &str, ctx: &ExecutionContext) -> Result<RunOutput, RunnerError> {
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(script_ref)
            .env("JOB_ID", ctx.job_id.to_string())
            .env("JOB_OWNER_ID", &ctx.owner_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| RunnerError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| RunnerError::Failed(format!("failed to spawn script: {}", e)))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(RunOutput {
                content: (!stdout.is_empty()).then_some(stdout),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(RunnerError::Failed(format!(
                "{}: {}",
                output.status, stderr
            )))
        }
    }
}
