//! Health Check API Tests

use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;

use crate::common::TestApp;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert!(response.body.get("version").is_some());
}

#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health/live", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "alive");
}

#[tokio::test]
async fn test_readiness_probe_checks_store() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health/ready", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["store"]["status"], "healthy");
    assert_eq!(response.body["checks"]["stream"]["active_connections"], 0);
    assert!(response.body["checks"].get("redis").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() {
    let app = TestApp::new().await;
    app.request(Method::GET, "/health", None, None).await;

    let response = app.request(Method::GET, "/metrics", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    let text = response.body.as_str().unwrap_or_default();
    assert!(text.contains("retrocomm_http_requests_total"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/nope", None, None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
