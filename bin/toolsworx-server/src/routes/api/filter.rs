//! Image filters (`/api/filter/*`).

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use toolsworx_core::JobKind;
use utoipa::OpenApi;

use super::upload;
use crate::error::ServerError;
use crate::schemas::api::convert::{ConvertUpload, SubmitResponse};
use crate::schemas::api::job::JobResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(apply_filter, filter_status, filter_download),
    components(schemas(ConvertUpload, SubmitResponse, JobResponse))
)]
pub struct FilterApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/filter/apply", post(apply_filter))
        .route("/filter/status/{id}", get(filter_status))
        .route("/filter/download/{id}", get(filter_download))
}

/// Upload an image and queue a filter.
///
/// `filter` is required (`grayscale`, `blur`, `rotate-90`, ...). The result
/// keeps the input's format unless `format` names another image format.
#[utoipa::path(
    post,
    path = "/api/filter/apply",
    tag = "filter",
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Job queued", body = SubmitResponse),
        (status = 400, description = "Missing file, not an image, or unknown filter"),
        (status = 413, description = "File too large"),
        (status = 503, description = "Too many jobs in progress"),
    )
)]
pub async fn apply_filter(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::submit(&state, JobKind::Filter, req).await
}

#[utoipa::path(
    get,
    path = "/api/filter/status/{id}",
    tag = "filter",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job state", body = JobResponse),
        (status = 404, description = "No filter job with this ID"),
    )
)]
pub async fn filter_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::status(&state, JobKind::Filter, &id, req).await
}

#[utoipa::path(
    get,
    path = "/api/filter/download/{id}",
    tag = "filter",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Filtered image"),
        (status = 404, description = "No filter job with this ID, or the result expired"),
        (status = 409, description = "Job not completed"),
    )
)]
pub async fn filter_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::download(&state, JobKind::Filter, &id, req).await
}
