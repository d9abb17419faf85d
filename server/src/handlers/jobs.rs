use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use engine::models::{Job, Recurrence, RunRecord};
use engine::recurrence;
use engine::store::JobStore;
use engine::webhook::generate_webhook_secret;
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::handlers::{engine_error_response, ErrorResponse, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub owner_id: String,
    pub name: String,
    pub script_ref: String,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    /// Explicit first due time; defaults to the recurrence's first
    /// occurrence when a recurrence is given.
    #[serde(default)]
    pub due_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watched_path: Option<PathBuf>,
    /// Provision a webhook trigger. The generated secret is returned once,
    /// in the creation response.
    #[serde(default)]
    pub webhook: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub name: String,
    pub script_ref: String,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub due_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watched_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct AddDependentRequest {
    pub dependent_id: Uuid,
}

/// Register a new job.
#[tracing::instrument(skip(state, req), fields(owner_id = %req.owner_id, name = %req.name))]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<SuccessResponse<Job>>, (StatusCode, Json<ErrorResponse>)> {
    let mut job = Job::new(req.owner_id, req.name, req.script_ref);

    if let Some(rule) = &req.recurrence {
        recurrence::validate(rule).map_err(|e| engine_error_response(e.into()))?;
    }
    job.due_time = match (req.due_time, &req.recurrence) {
        (Some(due), _) => Some(due),
        (None, Some(rule)) => recurrence::initial_due(rule, Utc::now())
            .map_err(|e| engine_error_response(e.into()))?,
        (None, None) => None,
    };
    job.recurrence = req.recurrence;
    job.watched_path = req.watched_path;
    if req.webhook {
        job.webhook_secret = Some(generate_webhook_secret());
    }

    state.store.create_job(&job).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to create job");
        engine_error_response(e.into())
    })?;

    tracing::info!(job_id = %job.id, "Job created");
    Ok(Json(SuccessResponse::new(job)))
}

/// Fetch a job. The webhook secret is only ever shown at creation time.
#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<Job>>, (StatusCode, Json<ErrorResponse>)> {
    let mut job = find_job(&state, id).await?;
    job.webhook_secret = None;
    Ok(Json(SuccessResponse::new(job)))
}

/// Replace a job's definition. Ownership, enablement, webhook secret and
/// the engine-managed scheduling state are preserved.
#[tracing::instrument(skip(state, req))]
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateJobRequest>,
) -> Result<Json<SuccessResponse<Job>>, (StatusCode, Json<ErrorResponse>)> {
    let mut job = find_job(&state, id).await?;

    if let Some(rule) = &req.recurrence {
        recurrence::validate(rule).map_err(|e| engine_error_response(e.into()))?;
    }
    job.name = req.name;
    job.script_ref = req.script_ref;
    job.due_time = match (req.due_time, &req.recurrence) {
        (Some(due), _) => Some(due),
        (None, Some(rule)) => recurrence::initial_due(rule, Utc::now())
            .map_err(|e| engine_error_response(e.into()))?,
        (None, None) => None,
    };
    job.recurrence = req.recurrence;
    job.watched_path = req.watched_path;

    state
        .store
        .update_job(&job)
        .await
        .map_err(|e| engine_error_response(e.into()))?;

    tracing::info!(job_id = %job.id, "Job updated");
    job.webhook_secret = None;
    Ok(Json(SuccessResponse::new(job)))
}

/// Delete a job. Jobs still referenced as dependents are tombstoned
/// instead of removed, so existing chains stay intact.
#[tracing::instrument(skip(state))]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<()>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .soft_delete_job(id)
        .await
        .map_err(|e| engine_error_response(e.into()))?;
    tracing::info!(job_id = %id, "Job deleted");
    Ok(Json(SuccessResponse::new(())))
}

#[tracing::instrument(skip(state))]
pub async fn enable_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<()>>, (StatusCode, Json<ErrorResponse>)> {
    set_enabled(&state, id, true).await
}

/// Disabling is cooperative: an in-flight run finishes, but no further
/// triggers fire.
#[tracing::instrument(skip(state))]
pub async fn disable_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<()>>, (StatusCode, Json<ErrorResponse>)> {
    set_enabled(&state, id, false).await
}

/// Add a completion-chain edge. Rejected if it would close a cycle.
#[tracing::instrument(skip(state))]
pub async fn add_dependent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddDependentRequest>,
) -> Result<Json<SuccessResponse<()>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .coordinator
        .chain()
        .add_dependency(id, req.dependent_id)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(SuccessResponse::new(())))
}

/// Run history for a job, most recent first.
#[tracing::instrument(skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<Vec<RunRecord>>>, (StatusCode, Json<ErrorResponse>)> {
    // Resolve first so an unknown id is a 404, not an empty list.
    find_job(&state, id).await?;
    let runs = state
        .store
        .runs_for(id)
        .await
        .map_err(|e| engine_error_response(e.into()))?;
    Ok(Json(SuccessResponse::new(runs)))
}

async fn set_enabled(
    state: &AppState,
    id: Uuid,
    enabled: bool,
) -> Result<Json<SuccessResponse<()>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .set_enabled(id, enabled)
        .await
        .map_err(|e| engine_error_response(e.into()))?;
    tracing::info!(job_id = %id, enabled = enabled, "Job enablement changed");
    Ok(Json(SuccessResponse::new(())))
}

async fn find_job(state: &AppState, id: Uuid) -> Result<Job, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .get_job(id)
        .await
        .map_err(|e| engine_error_response(e.into()))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("not_found", "Job not found")),
            )
        })
}
