//! Push webhook handler — validates the notification and dispatches a build.
//!
//! Replies as soon as the supervisor has decided; build results are only
//! visible through the job log and the job API.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::job::{JobId, JobState};
use crate::routes::AppState;
use crate::services::signature::{self, SIGNATURE_HEADER};
use crate::services::validator;

/// Headers that name the event kind, by forge.
const EVENT_HEADERS: &[&str] = &["x-github-event", "x-gitea-event", "x-gogs-event"];

#[derive(Debug, Serialize)]
pub struct Accepted {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub state: JobState,
}

/// Handle an incoming push webhook.
pub fn handle_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> AppResult<Response> {
    let endpoint = &state.config.endpoint;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !signature::validate_signature(&endpoint.webhook_secret, body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(AppError::InvalidSignature);
    }

    // No event header means a bare push notification.
    let event_type = event_kind(headers);
    crate::metrics::webhook_received(event_type.unwrap_or("push"));
    match event_type {
        Some("ping") => {
            tracing::info!("Received webhook ping");
            return Ok((StatusCode::OK, Json(json!({ "status": "pong" }))).into_response());
        }
        Some(kind) if kind != "push" => {
            tracing::debug!("Ignoring webhook event: {}", kind);
            return Ok((
                StatusCode::OK,
                Json(json!({ "status": "ignored", "event": kind })),
            )
                .into_response());
        }
        _ => {}
    }

    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;
    let event = validator::validate(&payload, &state.config.validator).inspect_err(|e| {
        tracing::warn!(code = e.code(), field = e.field(), "Rejected push payload: {e}");
    })?;

    tracing::info!(
        repository = %event.repository_name(),
        branch = %event.branch(),
        "Received push"
    );

    let job = state.supervisor.submit(event);
    if job.state == JobState::Rejected {
        return Err(AppError::Overloaded {
            retry_after_secs: endpoint.retry_after_secs,
        });
    }

    let accepted = Accepted {
        job_id: job.id,
        state: job.state,
    };
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

fn event_kind(headers: &HeaderMap) -> Option<&str> {
    EVENT_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
}
