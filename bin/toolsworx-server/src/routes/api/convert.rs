//! Generic file conversion (`/api/convert`): documents, spreadsheets,
//! presentations and images, plus anything FFmpeg can turn into media.

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
    paths(convert_file, file_status, file_download),
    components(schemas(ConvertUpload, SubmitResponse, JobResponse))
)]
pub struct ConvertApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert_file))
        .route("/status/{id}", get(file_status))
        .route("/download/{id}", get(file_download))
}

/// Upload a file and queue its conversion.
///
/// The tool is chosen from the input extension and the target `format`:
/// LibreOffice for office documents and PDF, the image pipeline for
/// image-to-image, FFmpeg for audio and video targets.
#[utoipa::path(
    post,
    path = "/api/convert",
    tag = "convert",
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Job queued", body = SubmitResponse),
        (status = 400, description = "Missing file, unsupported format or invalid options"),
        (status = 413, description = "File too large"),
        (status = 503, description = "Too many jobs in progress"),
    )
)]
pub async fn convert_file(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::submit(&state, JobKind::File, req).await
}

#[utoipa::path(
    get,
    path = "/api/status/{id}",
    tag = "convert",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job state", body = JobResponse),
        (status = 404, description = "No file conversion with this ID"),
    )
)]
pub async fn file_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::status(&state, JobKind::File, &id, req).await
}

#[utoipa::path(
    get,
    path = "/api/download/{id}",
    tag = "convert",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Converted file"),
        (status = 404, description = "No file conversion with this ID, or the result expired"),
        (status = 409, description = "Job not completed"),
    )
)]
pub async fn file_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::download(&state, JobKind::File, &id, req).await
}
