//! Read-only job inspection and health.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::job::{BuildJob, JobId};
use crate::routes::AppState;
use crate::services::supervisor::Supervisor;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "activeJobs")]
    pub active_jobs: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_jobs: state.supervisor.active_jobs(),
    })
}

/// Most recent jobs first, at most [`MAX_LIST_LIMIT`].
pub fn list_jobs(supervisor: &Supervisor, limit: Option<usize>) -> Vec<BuildJob> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    supervisor.recent_jobs(limit)
}

pub fn get_job(supervisor: &Supervisor, job_id: &str) -> AppResult<BuildJob> {
    let id: JobId = job_id.parse().map_err(|_| AppError::InvalidJobId)?;
    supervisor.job(id).ok_or(AppError::NotFound)
}
