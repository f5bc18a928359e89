use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::BodyExt;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

pub const X_TRACE_ID: &str = "x-trace-id";

/// Bodies up to this size with a JSON content type are logged.
const MAX_LOGGED_BODY: u64 = 1024;

/// Adds (or propagates) `x-trace-id`, wraps the request in an
/// `http_request` span and logs status and latency.
///
/// Uploads and downloads stream straight through; only small JSON bodies are
/// buffered for logging.
pub async fn trace_middleware(req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let header_value = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        debug!("→ request started");

        let (mut parts, body) = req.into_parts();
        let body = log_small_json("request", &parts.headers, body).await;
        if let Some(value) = &header_value {
            parts.headers.insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(Request::from_parts(parts, body)).await;

        let (mut parts, body) = response.into_parts();
        let body = log_small_json("response", &parts.headers, body).await;
        if let Some(value) = header_value {
            parts.headers.insert(X_TRACE_ID, value);
        }

        info!(
            status = parts.status.as_u16(),
            latency_ms = start_time.elapsed().as_millis() as u64,
            "← response finished"
        );
        Response::from_parts(parts, body)
    }
    .instrument(span)
    .await
}

async fn log_small_json(direction: &str, headers: &HeaderMap, body: Body) -> Body {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let small = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| body.size_hint().exact())
        .is_some_and(|len| len <= MAX_LOGGED_BODY);
    if !is_json || !small {
        return body;
    }

    let bytes: Bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Body::empty(),
    };
    if let Ok(text) = std::str::from_utf8(&bytes) {
        debug!(direction, body = %text, "json body");
    }
    Body::from(bytes)
}
