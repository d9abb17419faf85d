// Event dispatcher: validates webhook, manual and conversational triggers
// and forwards them into the execution coordinator. Validation is
// synchronous; the script outcome is reported asynchronously through the
// notification collaborator.

use crate::coordinator::ExecutionCoordinator;
use crate::errors::EngineError;
use crate::models::{Job, TriggerSource};
use crate::store::JobStore;
use crate::webhook::validate_webhook_signature;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Synchronous answer to a trigger call. Execution itself is detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAck {
    Accepted,
    /// The job exists but is disabled; a successful no-op, not an error.
    NoopDisabled,
}

pub struct EventDispatcher {
    store: Arc<dyn JobStore>,
    coordinator: ExecutionCoordinator,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn JobStore>, coordinator: ExecutionCoordinator) -> Self {
        Self { store, coordinator }
    }

    /// Webhook entry point. The caller authenticates by signing the raw
    /// request body with the job's shared secret.
    #[tracing::instrument(skip(self, body, signature), fields(job_id = %job_id))]
    pub async fn trigger_webhook(
        &self,
        job_id: Uuid,
        endpoint: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<TriggerAck, EngineError> {
        let job = self.resolve(job_id).await?;

        let secret = job
            .webhook_secret
            .as_deref()
            .ok_or(EngineError::InvalidSignature(job_id))?;
        if !validate_webhook_signature(body, signature, secret) {
            warn!("Webhook signature validation failed");
            return Err(EngineError::InvalidSignature(job_id));
        }

        Ok(self.accept(
            &job,
            TriggerSource::Webhook {
                endpoint: endpoint.to_string(),
            },
        ))
    }

    /// Manual entry point; the caller identity comes from the session the
    /// request arrived on and must match the job's owner.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn trigger_manual(&self, job_id: Uuid, caller: &str) -> Result<TriggerAck, EngineError> {
        let job = self.resolve(job_id).await?;
        authorize(&job, caller)?;

        Ok(self.accept(
            &job,
            TriggerSource::Manual {
                user_id: caller.to_string(),
                session_id: None,
            },
        ))
    }

    /// Conversational-command entry point: a manual trigger that keeps the
    /// originating session for audit.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn trigger_conversational(
        &self,
        job_id: Uuid,
        caller: &str,
        session_id: &str,
    ) -> Result<TriggerAck, EngineError> {
        let job = self.resolve(job_id).await?;
        authorize(&job, caller)?;

        Ok(self.accept(
            &job,
            TriggerSource::Manual {
                user_id: caller.to_string(),
                session_id: Some(session_id.to_string()),
            },
        ))
    }

    async fn resolve(&self, job_id: Uuid) -> Result<Job, EngineError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::NotFound(job_id))
    }

    /// Record the trigger for audit and detach the execution.
    fn accept(&self, job: &Job, source: TriggerSource) -> TriggerAck {
        if !job.is_active() {
            info!(
                job_id = %job.id,
                source = %source,
                "Trigger on disabled job recorded as no-op"
            );
            return TriggerAck::NoopDisabled;
        }

        info!(
            job_id = %job.id,
            job_name = %job.name,
            source = %source,
            "Trigger accepted"
        );

        let execution = self.coordinator.execute(job.id, source);
        let job_id = job.id;
        tokio::spawn(async move {
            match execution.await {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    debug!(job_id = %job_id, error = %e, "Execution deferred")
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Execution was not started"),
            }
        });

        TriggerAck::Accepted
    }
}

fn authorize(job: &Job, caller: &str) -> Result<(), EngineError> {
    if job.owner_id != caller {
        return Err(EngineError::Unauthorized {
            job_id: job.id,
            caller: caller.to_string(),
        });
    }
    Ok(())
}
