//! Job listing and management across all families.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use toolsworx_core::JobKind;
use utoipa::OpenApi;

use crate::entities::JobStore;
use crate::error::ServerError;
use crate::jobs;
use crate::schemas::api::job::{DeleteResponse, JobListQuery, JobListResponse, JobResponse, JobView};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_jobs, get_job, cancel_job, delete_job),
    components(schemas(JobView, JobResponse, JobListResponse, DeleteResponse))
)]
pub struct JobsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

#[utoipa::path(
    get,
    path = "/api/jobs",
    tag = "jobs",
    params(JobListQuery),
    responses(
        (status = 200, description = "Jobs, newest first", body = JobListResponse),
        (status = 400, description = "Unknown kind"),
    )
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, ServerError> {
    let kind = match q.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        Some(raw) => Some(JobKind::from_str(raw).map_err(|_| {
            ServerError::BadRequest(format!(
                "unknown kind '{raw}'; expected file, media or filter"
            ))
        })?),
        None => None,
    };
    let records = state.store.list_jobs(kind).await?;
    Ok(Json(JobListResponse {
        success: true,
        jobs: records.iter().map(|r| r.to_view()).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    tag = "jobs",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job state", body = JobResponse),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ServerError> {
    let record = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("job {id} not found")))?;
    Ok(Json(record.to_response()))
}

/// Stop a queued or processing job. Its files stay until the next sweep.
#[utoipa::path(
    post,
    path = "/api/jobs/{id}/cancel",
    tag = "jobs",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cancelled", body = JobResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already finished"),
    )
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ServerError> {
    let record = jobs::cancel(&state, &id).await?;
    Ok(Json(record.to_response()))
}

/// Cancel the job if it is still running, then delete its files and record.
#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    tag = "jobs",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job deleted", body = DeleteResponse),
        (status = 400, description = "Malformed job ID"),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServerError> {
    jobs::delete(&state, &id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        job_id: id,
    }))
}
