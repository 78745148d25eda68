mod common;

use axum::http::{header, StatusCode};
use common::{body_json, get, TestApp};

#[tokio::test]
async fn healthy_store_reports_ok() {
    let app = TestApp::new();
    let response = app.send(get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "up");
    assert_eq!(body["checks"]["encryption_key"], "configured");
}

#[tokio::test]
async fn store_outage_reports_unavailable() {
    let app = TestApp::new();
    app.store.set_available(false);
    let response = app.send(get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["checks"]["database"], "down");
}

#[tokio::test]
async fn responses_carry_hardening_headers_and_request_id() {
    let app = TestApp::new();
    let mut request = get("/health", None);
    request
        .headers_mut()
        .insert("x-request-id", "req-123".parse().unwrap());
    let response = app.send(request).await;

    let headers = response.headers();
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(headers["x-request-id"], "req-123");
}

#[tokio::test]
async fn metrics_without_recorder_is_not_found() {
    let app = TestApp::new();
    let response = app.send(get("/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn store_outage_leaves_requests_unauthenticated() {
    let app = TestApp::new();
    let admin = app.admin();
    app.store.set_available(false);
    // rate limiting fails open; the identity lookup cannot
    let response = app.send(get("/security/alerts", Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
