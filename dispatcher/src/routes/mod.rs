//! Dispatcher HTTP routes: webhook, job inspection, health.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::DispatcherConfig;
use crate::error::AppResult;
use crate::models::job::BuildJob;
use crate::services::supervisor::Supervisor;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub config: Arc<DispatcherConfig>,
}

impl AppState {
    pub fn new(config: DispatcherConfig) -> Self {
        let supervisor = Supervisor::new(config.policy.clone(), config.command.clone());
        Self {
            supervisor,
            config: Arc::new(config),
        }
    }
}

/// Build the dispatcher's Axum router.
///
/// Bodies over the configured bound are answered with 413 by the body
/// extractor, before any handler code runs.
pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.config.endpoint.max_body_bytes;
    Router::new()
        // Webhook
        .route(&state.config.endpoint.path, post(webhook_handler))
        // Job API
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/{job_id}", get(get_job_handler))
        .route("/health", get(api::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    webhook::handle_webhook(&state, &headers, &body).inspect_err(|e| {
        crate::metrics::webhook_rejected(e.code());
    })
}

// ── Job API ──

#[derive(serde::Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Json<Vec<BuildJob>> {
    Json(api::list_jobs(&state.supervisor, query.limit))
}

async fn get_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<BuildJob>> {
    api::get_job(&state.supervisor, &job_id).map(Json)
}
