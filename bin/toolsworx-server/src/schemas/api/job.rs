use serde::{Deserialize, Serialize};
use toolsworx_core::{JobKind, JobStatus};
use utoipa::{IntoParams, ToSchema};

use crate::entities::JobRecord;

/// URL prefix of the routes serving `kind`.
pub fn route_prefix(kind: JobKind) -> &'static str {
    match kind {
        JobKind::File => "/api",
        JobKind::Media => "/api/media",
        JobKind::Filter => "/api/filter",
    }
}

pub fn status_url(kind: JobKind, id: &str) -> String {
    format!("{}/status/{id}", route_prefix(kind))
}

pub fn download_url(kind: JobKind, id: &str) -> String {
    format!("{}/download/{id}", route_prefix(kind))
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobListQuery {
    /// Restrict to one family: `file`, `media` or `filter`.
    pub kind: Option<String>,
}

/// Public view of a job record. Filesystem paths are never exposed.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    #[schema(value_type = String, example = "media")]
    pub kind: JobKind,
    #[schema(value_type = String, example = "ffmpeg")]
    pub tool: String,
    #[schema(value_type = String, example = "processing")]
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    pub input_name: String,
    pub target_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present once the job completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub success: bool,
    #[serde(flatten)]
    pub job: JobView,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub success: bool,
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub job_id: String,
}

impl JobRecord {
    pub fn to_view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            kind: self.kind,
            tool: self.tool.to_string(),
            status: self.status,
            progress: self.progress,
            input_name: self.input_name.clone(),
            target_format: self.target_format.clone(),
            error: self.error_msg.clone(),
            download_url: (self.status == JobStatus::Completed)
                .then(|| download_url(self.kind, &self.id)),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }

    pub fn to_response(&self) -> JobResponse {
        JobResponse {
            success: true,
            job: self.to_view(),
        }
    }
}
