//! Read-only configuration summary.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::schemas::admin::config::ConfigSummary;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_config), components(schemas(ConfigSummary)))]
pub struct ConfigApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config))
}

#[utoipa::path(
    get,
    path = "/admin/config",
    tag = "admin",
    responses(
        (status = 200, description = "Effective configuration without secrets", body = ConfigSummary),
        (status = 401, description = "Unauthorised (admin token required)"),
    )
)]
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigSummary> {
    Json(ConfigSummary::from(state.config.as_ref()))
}
