//! Job API Handlers
//!
//! Intake of deployment jobs and lookup of their progress.

use aether_core::domain::job::DeploymentJob;
use aether_core::dto::job::{EnqueuedJob, JobStatus};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::api::AdminState;
use crate::api::error::{ApiError, ApiResult};

/// POST /jobs
/// Queue a deployment job
pub async fn enqueue_job(
    State(state): State<AdminState>,
    Json(job): Json<DeploymentJob>,
) -> ApiResult<(StatusCode, Json<EnqueuedJob>)> {
    job.validate().map_err(ApiError::BadRequest)?;

    let app_id = job.app_id();
    tracing::info!("Queueing deployment of {} ({}) as {}", job.repo, job.branch, app_id);

    let job_id = state.queue.enqueue(job)?;

    Ok((StatusCode::ACCEPTED, Json(EnqueuedJob { job_id, app_id })))
}

/// GET /jobs/{id}
/// Get job progress and, once finished, its outcome
pub async fn get_job(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatus>> {
    tracing::debug!("Getting job: {}", id);

    state
        .queue
        .tracker()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))
}
