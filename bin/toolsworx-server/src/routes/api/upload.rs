//! Request handling shared by the three tool families.
//!
//! Each family (`file`, `media`, `filter`) exposes the same submit, status
//! and download trio; the family modules only pin the [`JobKind`] and carry
//! the OpenAPI annotations.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use toolsworx_core::staging::{output_file_name, sanitize_filename};
use toolsworx_core::{
    ImageFilter, JobKind, JobSpec, JobStatus, Plan, ToolError, mime_type, plan, validate,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{JobRecord, JobStore};
use crate::error::ServerError;
use crate::jobs::{self, Submission};
use crate::schemas::api::convert::{ConversionForm, SubmitResponse};
use crate::schemas::api::job::{download_url, status_url};
use crate::state::AppState;
use crate::upstream;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Accept a multipart upload for `kind` and queue the job.
pub async fn submit(
    state: &Arc<AppState>,
    kind: JobKind,
    req: Request,
) -> Result<Response, ServerError> {
    if let Some(base) = state.config.upstreams.for_kind(kind) {
        return upstream::forward(state, base, req).await;
    }
    jobs::ensure_capacity(state).await?;

    let multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let id = Uuid::new_v4().to_string();
    let submission = match receive(state, kind, &id, multipart).await {
        Ok(submission) => submission,
        Err(e) => {
            discard(state, &id).await;
            return Err(e);
        }
    };
    let record = match jobs::submit(state, submission).await {
        Ok(record) => record,
        Err(e) => {
            discard(state, &id).await;
            return Err(e);
        }
    };

    Ok(Json(SubmitResponse {
        success: true,
        status_url: status_url(kind, &record.id),
        download_url: download_url(kind, &record.id),
        job_id: record.id,
    })
    .into_response())
}

/// Report the state of a job of `kind`.
pub async fn status(
    state: &Arc<AppState>,
    kind: JobKind,
    id: &str,
    req: Request,
) -> Result<Response, ServerError> {
    if let Some(base) = state.config.upstreams.for_kind(kind) {
        return upstream::forward(state, base, req).await;
    }
    let record = find(state, kind, id).await?;
    Ok(Json(record.to_response()).into_response())
}

/// Stream the converted file of a completed job of `kind`.
pub async fn download(
    state: &Arc<AppState>,
    kind: JobKind,
    id: &str,
    req: Request,
) -> Result<Response, ServerError> {
    if let Some(base) = state.config.upstreams.for_kind(kind) {
        return upstream::forward(state, base, req).await;
    }
    let record = find(state, kind, id).await?;
    if record.status != JobStatus::Completed {
        return Err(ServerError::Conflict(format!(
            "job {id} is {}; the result is not ready",
            record.status
        )));
    }
    let path = record
        .output_path
        .as_deref()
        .ok_or_else(|| ServerError::Internal(format!("completed job {id} has no output path")))?;

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::NotFound(format!(
                "the result of job {id} has expired"
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    let file_name = output_file_name(&record.input_name, &record.target_format);
    debug!(job_id = %id, bytes = len, file_name = %file_name, "streaming download");

    let headers = [
        (header::CONTENT_TYPE, mime_type(&record.target_format).to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
        (header::CONTENT_LENGTH, len.to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Load a job, hiding jobs that belong to another family.
async fn find(state: &AppState, kind: JobKind, id: &str) -> Result<JobRecord, ServerError> {
    state
        .store
        .get_job(id)
        .await?
        .filter(|record| record.kind == kind)
        .ok_or_else(|| ServerError::NotFound(format!("job {id} not found")))
}

/// Read the multipart form, storing the file under the job directory, and
/// plan the job.
async fn receive(
    state: &AppState,
    kind: JobKind,
    id: &str,
    mut multipart: Multipart,
) -> Result<Submission, ServerError> {
    let mut form = ConversionForm::default();
    let mut upload = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_owned();
        if name != FILE_FIELD {
            let value = field.text().await.map_err(multipart_error)?;
            form.set(&name, &value)?;
            continue;
        }
        if upload.is_some() {
            return Err(ServerError::BadRequest(
                "only one file may be uploaded per job".into(),
            ));
        }

        let input_name = sanitize_filename(field.file_name().unwrap_or("upload"));
        let dir = state.workspace.create_job(id).await?;
        let input = dir.input_path(&input_name);
        let size = write_field(&mut field, &input, state.config.max_upload_bytes()).await?;
        if size == 0 {
            return Err(ServerError::BadRequest("uploaded file is empty".into()));
        }
        debug!(job_id = %id, input_name = %input_name, bytes = size, "upload stored");
        upload = Some((input_name, input, dir));
    }

    let (input_name, input, dir) = upload.ok_or_else(|| {
        ServerError::BadRequest(format!("no file uploaded; send it in the '{FILE_FIELD}' field"))
    })?;
    let options = form.to_options()?;
    let filter = match (kind, form.filter.as_deref()) {
        (JobKind::Filter, Some(name)) => Some(
            ImageFilter::from_str(name).map_err(|_| ToolError::UnknownFilter(name.to_owned()))?,
        ),
        _ => None,
    };
    let Plan {
        tool,
        target_format,
    } = plan(kind, &input_name, form.format.as_deref(), filter)?;
    let output = dir.output_path(&input_name, &target_format);
    let spec = JobSpec {
        id: id.to_owned(),
        kind,
        tool,
        input,
        output,
        target_format,
        filter,
        options,
    };
    validate(&spec)?;

    info!(job_id = %id, kind = %kind, tool = %tool, target = %spec.target_format, "upload accepted");
    Ok(Submission { spec, input_name })
}

/// Stream one multipart field to `path`, refusing more than `limit` bytes.
async fn write_field(field: &mut Field<'_>, path: &Path, limit: usize) -> Result<usize, ServerError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        if written > limit {
            return Err(ServerError::PayloadTooLarge(format!(
                "file exceeds the {} MB upload limit",
                limit / (1024 * 1024)
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

fn multipart_error(e: MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(e.body_text())
    } else {
        ServerError::BadRequest(e.body_text())
    }
}

/// Drop the staging directory of a submission that never became a job.
async fn discard(state: &AppState, id: &str) {
    if let Err(e) = state.workspace.remove_job(id).await {
        warn!(job_id = %id, error = %e, "failed to remove rejected upload");
    }
}
