pub mod convert;
pub mod filter;
pub mod jobs;
pub mod media;
mod upload;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/api`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(convert::router())
        .merge(media::router())
        .merge(filter::router())
        .merge(jobs::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct ToolsApi;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = ToolsApi::openapi();
    spec.merge(convert::ConvertApi::openapi());
    spec.merge(media::MediaApi::openapi());
    spec.merge(filter::FilterApi::openapi());
    spec.merge(jobs::JobsApi::openapi());
    spec
}
