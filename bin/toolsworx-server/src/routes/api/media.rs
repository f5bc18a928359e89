//! Audio and video conversion through FFmpeg (`/api/media/*`).

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
    paths(convert_media, media_status, media_download),
    components(schemas(ConvertUpload, SubmitResponse, JobResponse))
)]
pub struct MediaApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/convert", post(convert_media))
        .route("/media/status/{id}", get(media_status))
        .route("/media/download/{id}", get(media_download))
}

/// Upload an audio or video file and queue an FFmpeg conversion.
///
/// Targets are audio or video containers, or `gif`. Bitrates, quality,
/// size, frame rate, trimming and channel layout are optional form fields.
#[utoipa::path(
    post,
    path = "/api/media/convert",
    tag = "media",
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Job queued", body = SubmitResponse),
        (status = 400, description = "Missing file, unsupported format or invalid options"),
        (status = 413, description = "File too large"),
        (status = 503, description = "Too many jobs in progress"),
    )
)]
pub async fn convert_media(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::submit(&state, JobKind::Media, req).await
}

#[utoipa::path(
    get,
    path = "/api/media/status/{id}",
    tag = "media",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job state", body = JobResponse),
        (status = 404, description = "No media conversion with this ID"),
    )
)]
pub async fn media_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::status(&state, JobKind::Media, &id, req).await
}

#[utoipa::path(
    get,
    path = "/api/media/download/{id}",
    tag = "media",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Converted file"),
        (status = 404, description = "No media conversion with this ID, or the result expired"),
        (status = 409, description = "Job not completed"),
    )
)]
pub async fn media_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    upload::download(&state, JobKind::Media, &id, req).await
}
