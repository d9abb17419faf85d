// Notification boundary.

use crate::models::RunStatus;
use anyhow::Result;
use uuid::Uuid;

/// Notification collaborator: receives every run's terminal status and
/// optional output. Delivery mechanism and channel are its own concern.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        job_id: Uuid,
        status: RunStatus,
        body: Option<&str>,
    ) -> Result<()>;
}

/// Log-based notifier (default implementation).
///
/// Production deployments replace this with a delivery integration
/// (chat message, email, push); the engine does not care which.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    #[tracing::instrument(skip(self, body))]
    async fn notify(
        &self,
        job_id: Uuid,
        status: RunStatus,
        body: Option<&str>,
    ) -> Result<()> {
        match status {
            RunStatus::Failed => tracing::error!(
                job_id = %job_id,
                status = %status,
                body = body.unwrap_or(""),
                "Job run failed"
            ),
            _ => tracing::info!(
                job_id = %job_id,
                status = %status,
                body = body.unwrap_or(""),
                "Job run completed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_accepts_all_statuses() {
        let notifier = LogNotifier;
        let job_id = Uuid::new_v4();
        assert!(notifier.notify(job_id, RunStatus::Success, Some("ok")).await.is_ok());
        assert!(notifier.notify(job_id, RunStatus::Failed, Some("boom")).await.is_ok());
        assert!(notifier.notify(job_id, RunStatus::Running, None).await.is_ok());
    }
}
