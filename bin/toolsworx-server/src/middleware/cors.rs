use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::state::AppState;

pub fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    let Some(origins_str) = &state.config.cors_allowed_origins else {
        // Wildcard for development; set TOOLSWORX_CORS_ORIGINS in production.
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        warn!(origins = %origins_str, "no valid CORS origins configured; allowing any");
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}
