//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become the
//! `{ "success": false, "error": "..." }` body the web tools expect.
//!
//! Internal errors (database, I/O, tool crashes) are logged with full detail
//! but only a generic message is returned, so file paths and SQL never leak
//! to clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use toolsworx_core::ToolError;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Planning or validation failure from the conversion engine.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The job exists but is in the wrong state for the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Too many unfinished jobs; the client should retry later.
    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The upstream service could not be reached.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Tool(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Tool(_) | ServerError::Database(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Tool(e) if e.is_client_error() => e.to_string(),
            ServerError::NotFound(m)
            | ServerError::BadRequest(m)
            | ServerError::PayloadTooLarge(m)
            | ServerError::Conflict(m)
            | ServerError::QueueFull(m)
            | ServerError::UpstreamTimeout(m)
            | ServerError::Upstream(m) => m.clone(),

            ServerError::Tool(e) => {
                error!(error = %e, "conversion engine error");
                "internal server error".to_owned()
            }
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                "internal server error".to_owned()
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
        };
        (
            status,
            Json(json!({ "success": false, "error": client_message })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Internal(format!("I/O error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn client_tool_errors_are_exposed() {
        let (status, body) = body_of(ServerError::Tool(ToolError::UnsupportedFormat {
            format: "exe".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unsupported format 'exe'");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) =
            body_of(ServerError::Internal("/var/secret/path exploded".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");

        let (status, _) = body_of(ServerError::Tool(ToolError::MissingOutput {
            tool: toolsworx_core::Tool::Ffmpeg,
        }))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn statuses() {
        assert_eq!(ServerError::QueueFull("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ServerError::PayloadTooLarge("x".into()).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ServerError::UpstreamTimeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ServerError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ServerError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }
}
