//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection, upload body limit)
//! - Optional OpenAPI document (disable with `TOOLSWORX_ENABLE_DOCS=false`)
//! - Health / heartbeat route
//! - Conversion and job routes under `/api`
//! - admin `/admin` routes (optionally protected by bearer token)

mod admin;
mod api;
pub mod doc;
mod health;
#[cfg(test)]
mod tests;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{middleware, Json, Router};
use crate::middleware::{cors, trace};
use crate::state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;

/// Room for multipart boundaries and the text fields around the file.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .nest("/api", api::router())
        .nest("/admin", admin::router(state.clone()));

    let mut app = Router::new().merge(api_router);

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app.route(
            "/api-docs/openapi.json",
            get(move || {
                let api_doc = api_doc.clone();
                async move { Json(api_doc) }
            }),
        );
    }

    let body_limit = state
        .config
        .max_upload_bytes()
        .saturating_add(FORM_OVERHEAD_BYTES);

    app.layer(DefaultBodyLimit::max(body_limit))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
