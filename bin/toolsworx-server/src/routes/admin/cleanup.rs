//! On-demand cleanup sweep.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::jobs::cleanup::{self, SweepReport};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(run_cleanup), components(schemas(SweepReport)))]
pub struct CleanupApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cleanup", post(run_cleanup))
}

/// Run the sweep the background cleaner runs every interval.
#[utoipa::path(
    post,
    path = "/admin/cleanup",
    tag = "admin",
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport),
        (status = 401, description = "Unauthorised (admin token required)"),
    )
)]
pub async fn run_cleanup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, ServerError> {
    let report = cleanup::run_sweep(&state).await?;
    info!(
        jobs_removed = report.jobs_removed,
        directories_removed = report.directories_removed,
        "manual cleanup"
    );
    Ok(Json(report))
}
