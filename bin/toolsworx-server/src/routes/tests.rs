use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::Config;
use crate::middleware::trace::X_TRACE_ID;
use crate::state::testing::{TestState, test_state};

const BOUNDARY: &str = "toolsworx-test-boundary";

async fn app(configure: impl FnOnce(&mut Config)) -> (Router, TestState) {
    let test = test_state(configure).await;
    (super::build(test.state.clone()), test)
}

/// Hand-built `multipart/form-data` body.
fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn form_request(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn upload(path: &str, fields: &[(&str, &str)], file_name: &str, bytes: &[u8]) -> Request<Body> {
    form_request(path, multipart(fields, Some((file_name, bytes))))
}

/// A form without a `file` field.
fn fields_only(path: &str, fields: &[(&str, &str)]) -> Request<Body> {
    form_request(path, multipart(fields, None))
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn send(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

async fn call(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Submit and return the job id.
async fn submit(
    app: &Router,
    path: &str,
    fields: &[(&str, &str)],
    file_name: &str,
    bytes: &[u8],
) -> String {
    let response = call(app, upload(path, fields, file_name, bytes)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["success"], true);
    body["jobId"].as_str().unwrap().to_owned()
}

async fn wait_for(app: &Router, status_path: &str, wanted: &str) -> Value {
    for _ in 0..200 {
        let body = json(call(app, get(status_path)).await).await;
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{status_path} never reached {wanted}");
}

#[tokio::test]
async fn media_conversion_runs_to_download() {
    let (app, _test) = app(|_| {}).await;
    let audio = b"RIFF fake wave data".to_vec();

    let response = call(
        &app,
        upload(
            "/api/media/convert",
            &[("format", "mp3"), ("bitrate", "192k")],
            "Field Recording.wav",
            &audio,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    let id = body["jobId"].as_str().unwrap().to_owned();
    assert_eq!(body["statusUrl"], format!("/api/media/status/{id}"));
    assert_eq!(body["downloadUrl"], format!("/api/media/download/{id}"));

    let status = wait_for(&app, &format!("/api/media/status/{id}"), "completed").await;
    assert_eq!(status["progress"], 100);
    assert_eq!(status["kind"], "media");
    assert_eq!(status["tool"], "ffmpeg");
    assert_eq!(status["targetFormat"], "mp3");
    assert_eq!(status["downloadUrl"], format!("/api/media/download/{id}"));

    let response = call(&app, get(&format!("/api/media/download/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Field_Recording.mp3\""
    );
    assert_eq!(headers[header::CONTENT_LENGTH], audio.len().to_string().as_str());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), audio.as_slice());
}

#[tokio::test]
async fn filter_job_keeps_the_input_format() {
    let (app, _test) = app(|_| {}).await;
    let id = submit(
        &app,
        "/api/filter/apply",
        &[("filter", "grayscale")],
        "cat.png",
        b"\x89PNG fake",
    )
    .await;

    let status = wait_for(&app, &format!("/api/filter/status/{id}"), "completed").await;
    assert_eq!(status["tool"], "image");
    assert_eq!(status["targetFormat"], "png");
}

#[tokio::test]
async fn bad_uploads_are_rejected_with_400() {
    let (app, test) = app(|_| {}).await;
    let cases: [(&str, &[(&str, &str)], &str, &[u8]); 5] = [
        ("/api/convert", &[("format", "xyz")], "notes.txt", b"hello"),
        ("/api/convert", &[("format", "mp3")], "sheet.xlsx", b"PK"),
        ("/api/media/convert", &[("format", "mp3"), ("quality", "0")], "a.wav", b"RIFF"),
        ("/api/filter/apply", &[("filter", "posterize")], "cat.png", b"png"),
        ("/api/filter/apply", &[], "cat.png", b"png"),
    ];

    for (path, fields, file_name, bytes) in cases {
        let response = call(&app, upload(path, fields, file_name, bytes)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path} {fields:?}");
        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    let response = call(&app, fields_only("/api/convert", &[("format", "pdf")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json(response).await["error"].as_str().unwrap().contains("file"));

    // Rejected uploads leave nothing behind.
    let mut entries = tokio::fs::read_dir(test.state.workspace.root()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn options_the_tool_cannot_honour_are_400() {
    let (app, test) = app(|_| {}).await;
    let cases: [(&str, &[(&str, &str)], &str); 4] = [
        ("/api/media/convert", &[("format", "flac"), ("audioBitrateKbps", "320")], "a.wav"),
        ("/api/media/convert", &[("format", "mp3"), ("sampleRate", "12345")], "a.wav"),
        (
            "/api/media/convert",
            &[("format", "webm"), ("quality", "50"), ("videoBitrateKbps", "1000")],
            "a.mov",
        ),
        ("/api/filter/apply", &[("filter", "blur"), ("intensity", "300")], "cat.png"),
    ];

    for (path, fields, file_name) in cases {
        let response = call(&app, upload(path, fields, file_name, b"data")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path} {fields:?}");
        let body = json(response).await;
        assert!(
            body["error"].as_str().is_some_and(|e| e.contains("invalid option")),
            "{body}"
        );
    }

    let jobs = json(call(&app, get("/api/jobs")).await).await;
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 0);
    let mut entries = tokio::fs::read_dir(test.state.workspace.root()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_file_is_rejected() {
    let (app, _test) = app(|_| {}).await;
    let response = call(
        &app,
        upload("/api/convert", &[("format", "pdf")], "empty.docx", b""),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let (app, test) = app(|config| config.max_upload_size_mb = 1).await;
    let big = vec![0u8; 1024 * 1024 + 1];
    let response = call(
        &app,
        upload("/api/media/convert", &[("format", "mp3")], "big.wav", &big),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json(response).await["success"], false);

    let mut entries = tokio::fs::read_dir(test.state.workspace.root()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn status_and_download_are_scoped_to_their_family() {
    let (app, _test) = app(|_| {}).await;
    let id = submit(
        &app,
        "/api/convert",
        &[("format", "pdf")],
        "report.docx",
        b"PK fake docx",
    )
    .await;

    assert_eq!(
        call(&app, get(&format!("/api/status/{id}"))).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        call(&app, get(&format!("/api/media/status/{id}"))).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        call(&app, get(&format!("/api/filter/download/{id}"))).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        call(&app, get("/api/status/does-not-exist")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn download_before_completion_is_409() {
    let (app, _test) = app(|config| config.mock_delay_ms = 10_000).await;
    let id = submit(&app, "/api/media/convert", &[("format", "mp4")], "clip.mov", b"moov").await;

    let response = call(&app, get(&format!("/api/media/download/{id}"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_stops_a_running_job() {
    let (app, test) = app(|config| config.mock_delay_ms = 10_000).await;
    let id = submit(&app, "/api/media/convert", &[("format", "mp3")], "song.flac", b"fLaC").await;

    let response = call(&app, send("POST", &format!("/api/jobs/{id}/cancel"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "cancelled");
    assert!(!test.state.task_manager.is_active(&id));

    let again = call(&app, send("POST", &format!("/api/jobs/{id}/cancel"))).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    // Stays cancelled.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let body = json(call(&app, get(&format!("/api/media/status/{id}"))).await).await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn delete_removes_record_and_files() {
    let (app, test) = app(|_| {}).await;
    let id = submit(&app, "/api/convert", &[("format", "png")], "photo.jpg", b"jpeg").await;
    wait_for(&app, &format!("/api/status/{id}"), "completed").await;
    assert!(test.state.workspace.root().join(&id).exists());

    let response = call(&app, send("DELETE", &format!("/api/jobs/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["jobId"], id.as_str());

    assert!(!test.state.workspace.root().join(&id).exists());
    assert_eq!(
        call(&app, get(&format!("/api/jobs/{id}"))).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        call(&app, send("DELETE", "/api/jobs/..")).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn jobs_can_be_listed_by_kind() {
    let (app, _test) = app(|_| {}).await;
    submit(&app, "/api/convert", &[("format", "pdf")], "a.docx", b"PK").await;
    submit(&app, "/api/media/convert", &[("format", "mp3")], "b.wav", b"RIFF").await;

    let all = json(call(&app, get("/api/jobs")).await).await;
    assert_eq!(all["jobs"].as_array().unwrap().len(), 2);

    let media = json(call(&app, get("/api/jobs?kind=media")).await).await;
    let jobs = media["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["inputName"], "b.wav");

    assert_eq!(
        call(&app, get("/api/jobs?kind=video")).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn full_queue_is_503() {
    let (app, _test) = app(|config| {
        config.max_pending_jobs = 1;
        config.mock_delay_ms = 10_000;
    })
    .await;
    submit(&app, "/api/media/convert", &[("format", "mp3")], "a.wav", b"RIFF").await;

    let response = call(
        &app,
        upload("/api/media/convert", &[("format", "mp3")], "b.wav", b"RIFF"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(response).await["success"], false);
}

#[tokio::test]
async fn admin_routes_require_the_token() {
    let (app, _test) = app(|config| config.admin_token = Some("s3cret".into())).await;

    let response = call(&app, send("POST", "/admin/cleanup")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["error"], "unauthorised");

    let authorised = Request::builder()
        .method("POST")
        .uri("/admin/cleanup")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = call(&app, authorised).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json(response).await;
    assert_eq!(report["jobsRemoved"], 0);

    let config = Request::builder()
        .uri("/admin/config")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let body = json(call(&app, config).await).await;
    assert_eq!(body["adminTokenSet"], true);
    assert!(!body.to_string().contains("s3cret"));
}

#[tokio::test]
async fn health_and_docs_are_served() {
    let (app, _test) = app(|_| {}).await;

    let health = json(call(&app, get("/health")).await).await;
    assert_eq!(health["status"], "ok");
    assert!(health["tools"]["ffmpeg"].is_number());

    let docs = json(call(&app, get("/api-docs/openapi.json")).await).await;
    assert!(docs["paths"]["/api/convert"].is_object());
    assert!(docs["paths"]["/api/media/download/{id}"].is_object());
    assert!(docs["paths"]["/admin/cleanup"].is_object());

    let (no_docs, _test) = self::app(|config| config.enable_docs = false).await;
    assert_eq!(
        call(&no_docs, get("/api-docs/openapi.json")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn trace_id_is_propagated() {
    let (app, _test) = app(|_| {}).await;
    let id = "6f1c1d1e-8f0a-4c5e-9a55-2b7f5f0e2c11";
    let req = Request::builder()
        .uri("/health")
        .header(X_TRACE_ID, id)
        .body(Body::empty())
        .unwrap();
    let response = call(&app, req).await;
    assert_eq!(response.headers()[X_TRACE_ID], id);

    let response = call(&app, get("/health")).await;
    assert!(response.headers().contains_key(X_TRACE_ID));
}

#[tokio::test]
async fn proxied_family_is_forwarded_upstream() {
    use axum::extract::OriginalUri;

    async fn echo(OriginalUri(uri): OriginalUri, req: Request<Body>) -> Response {
        let auth = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let body = req.into_body().collect().await.unwrap().to_bytes();
        axum::response::IntoResponse::into_response((
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-store"),
                (header::SET_COOKIE, "upstream=1"),
            ],
            serde_json::json!({
                "path": uri.to_string(),
                "auth": auth,
                "bodyLen": body.len(),
            })
            .to_string(),
        ))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(echo))
            .await
            .unwrap();
    });

    let (app, _test) = app(|config| {
        config.upstreams.media = Some(format!("http://{addr}"));
    })
    .await;

    let req = Request::builder()
        .uri("/api/media/status/abc?verbose=1")
        .header(header::AUTHORIZATION, "Bearer user")
        .body(Body::empty())
        .unwrap();
    let response = call(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = json(response).await;
    assert_eq!(body["path"], "/api/media/status/abc?verbose=1");
    assert_eq!(body["auth"], "Bearer user");

    let response = call(
        &app,
        upload("/api/media/convert", &[("format", "mp3")], "a.wav", b"RIFF"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["path"], "/api/media/convert");
    assert!(body["bodyLen"].as_u64().unwrap() > 0);

    // Other families are still served locally.
    assert_eq!(
        call(&app, get("/api/status/abc")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (app, _test) = app(|config| {
        config.upstreams.filter = Some(format!("http://{addr}"));
    })
    .await;
    let response = call(&app, get("/api/filter/status/abc")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json(response).await["success"], false);
}

#[tokio::test]
async fn slow_upstream_is_504() {
    async fn stall() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "late"
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(stall))
            .await
            .unwrap();
    });

    let (app, _test) = app(|config| {
        config.upstreams.file = Some(format!("http://{addr}"));
        config.upstream_timeout_secs = 1;
    })
    .await;
    let response = call(&app, get("/api/status/abc")).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json(response).await["success"], false);
}
