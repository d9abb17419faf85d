use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use engine::dispatcher::TriggerAck;
use serde::Serialize;
use uuid::Uuid;

use crate::handlers::{engine_error_response, ErrorResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: Uuid,
    pub ack: TriggerAck,
    pub message: String,
}

/// Manual/conversational trigger endpoint. Caller identity comes from the
/// session layer in front of this service, forwarded as `X-Caller-Id`;
/// conversational invocations also carry `X-Session-Id`.
#[tracing::instrument(skip(state, headers))]
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<TriggerResponse>), (StatusCode, Json<ErrorResponse>)> {
    let caller = header_value(&headers, "X-Caller-Id").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "unauthorized",
                "X-Caller-Id header is required",
            )),
        )
    })?;

    let ack = match header_value(&headers, "X-Session-Id") {
        Some(session) => state
            .dispatcher
            .trigger_conversational(id, &caller, &session)
            .await,
        None => state.dispatcher.trigger_manual(id, &caller).await,
    }
    .map_err(engine_error_response)?;

    Ok(respond(id, ack))
}

/// Webhook trigger endpoint. The caller signs the raw request body with
/// the job's shared secret and sends the signature alongside it.
#[tracing::instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<TriggerResponse>), (StatusCode, Json<ErrorResponse>)> {
    let signature = header_value(&headers, "X-Hook-Signature").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "unauthorized",
                "X-Hook-Signature header is required",
            )),
        )
    })?;

    let endpoint = format!("/api/hooks/{}", id);
    let ack = state
        .dispatcher
        .trigger_webhook(id, &endpoint, &body, &signature)
        .await
        .map_err(engine_error_response)?;

    Ok(respond(id, ack))
}

fn respond(job_id: Uuid, ack: TriggerAck) -> (StatusCode, Json<TriggerResponse>) {
    let (status, message) = match ack {
        TriggerAck::Accepted => (StatusCode::ACCEPTED, "Execution queued"),
        TriggerAck::NoopDisabled => (StatusCode::OK, "Job is disabled, trigger recorded as no-op"),
    };
    (
        status,
        Json(TriggerResponse {
            job_id,
            ack,
            message: message.to_string(),
        }),
    )
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
