//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use strum::IntoEnumIterator;
use toolsworx_core::Tool;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "...", "mockTools": bool,
/// "tools": {"ffmpeg": <free slots>, ...}}` with HTTP 200.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tools: Map<String, Value> = Tool::iter()
        .filter_map(|tool| {
            state
                .resources
                .available(tool)
                .map(|free| (tool.to_string(), json!(free)))
        })
        .collect();

    Json(json!({
        "status":    "ok",
        "version":   env!("CARGO_PKG_VERSION"),
        "mockTools": state.toolbox.is_mock(),
        "tools":     tools,
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
