//! Proxy mode: forward a tool family's requests to an upstream service.
//!
//! When `FILE_SERVICE_URL`, `MEDIA_SERVICE_URL` or `FILTER_SERVICE_URL` (or
//! `BACKEND_URL`) is set, the matching routes stop converting locally and
//! relay the request to `<base><path>?<query>`, streaming both bodies.

use axum::body::Body;
use axum::extract::{OriginalUri, Request};
use axum::http::{HeaderMap, Method, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::middleware::trace::X_TRACE_ID;
use crate::state::AppState;

/// Request headers relayed to the upstream service.
const FORWARDED_REQUEST_HEADERS: [&str; 4] = ["authorization", "content-type", "accept", X_TRACE_ID];

/// Response headers relayed back to the client.
const FORWARDED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_DISPOSITION,
    header::CONTENT_LENGTH,
    header::CACHE_CONTROL,
];

/// Forward `req` to `base` and stream the upstream answer back unchanged.
pub async fn forward(state: &AppState, base: &str, req: Request) -> Result<Response, ServerError> {
    let (parts, body) = req.into_parts();
    // Nested routers strip their prefix from `parts.uri`.
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| parts.uri.clone());
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", base.trim_end_matches('/'), path_and_query);
    debug!(method = %parts.method, url = %target, "forwarding to upstream");

    let mut builder = state
        .http
        .request(parts.method.clone(), &target)
        .headers(forwarded_headers(&parts.headers))
        .timeout(state.config.upstream_timeout());
    if !matches!(parts.method, Method::GET | Method::HEAD) {
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = builder.send().await.map_err(|e| {
        warn!(url = %target, error = %e, "upstream request failed");
        if e.is_timeout() {
            ServerError::UpstreamTimeout(format!(
                "upstream did not answer within {}s",
                state.config.upstream_timeout_secs
            ))
        } else {
            ServerError::Upstream("conversion service unavailable".into())
        }
    })?;

    let status = upstream.status();
    let mut out_headers = HeaderMap::new();
    for key in FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = upstream.headers().get(&key) {
            out_headers.insert(key, value.clone());
        }
    }

    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    let mut response = (status, Body::from_stream(stream)).into_response();
    *response.headers_mut() = out_headers;
    Ok(response)
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = headers.get(name) {
            if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
                out.insert(name, value.clone());
            }
        }
    }
    out
}
