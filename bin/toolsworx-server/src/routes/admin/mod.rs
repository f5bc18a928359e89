pub mod cleanup;
pub mod config;

use crate::middleware::auth;
use crate::state::AppState;

use axum::{
    middleware::{self},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

// Routes nested under `/admin` (cleanup, config).
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(cleanup::router())
        .merge(config::router())
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::auth_middleware,
        ))
}

#[derive(OpenApi)]
#[openapi()]
pub struct AdminApi;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = AdminApi::openapi();
    spec.merge(cleanup::CleanupApi::openapi());
    spec.merge(config::ConfigApi::openapi());
    spec
}
