use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::state::AppState;

/// Bearer-token guard for `/admin`. Open when no admin token is configured.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected_token) = &state.config.admin_token {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match provided {
            Some(token) if token == expected_token => {}
            _ => {
                warn!(path = %req.uri().path(), "rejected admin request");
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({ "success": false, "error": "unauthorised" })),
                )
                    .into_response();
            }
        }
    }
    next.run(req).await
}
