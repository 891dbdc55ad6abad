//! User Profile API Tests

use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{sign_token, TestApp, TestUser};

#[tokio::test]
async fn test_profile_created_on_first_request() {
    let app = TestApp::new().await;
    let user = TestUser::new("neon");

    let response = app.get("/users/@me", &user).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["id"], user.id.to_string());
    assert_eq!(response.body["username"], "neon");
    assert_eq!(response.body["status"], "");
}

#[tokio::test]
async fn test_username_fallback_and_collision() {
    let app = TestApp::new().await;
    let first = TestUser::new("neon");
    let second = TestUser::new("neon");
    app.get("/users/@me", &first).await;

    let collided = app.get("/users/@me", &second).await;
    assert_ne!(collided.body["username"], "neon");
    assert!(collided.body["username"]
        .as_str()
        .unwrap()
        .starts_with("neon"));

    let id = uuid::Uuid::new_v4();
    let anonymous = sign_token(&id.to_string(), None, 3600);
    let response = app
        .request(Method::GET, "/users/@me", Some(&anonymous), None)
        .await;
    let expected = format!("user-{}", &id.simple().to_string()[..8]);
    assert_eq!(response.body["username"], expected);
}

#[tokio::test]
async fn test_update_profile() {
    let app = TestApp::new().await;
    let user = TestUser::new("neon");

    let response = app
        .request(
            Method::PATCH,
            "/users/@me",
            Some(&user.token),
            Some(json!({ "status": "  listening to synthwave  " })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "listening to synthwave");
    assert_eq!(response.body["bio"], "");

    let too_long = app
        .request(
            Method::PATCH,
            "/users/@me",
            Some(&user.token),
            Some(json!({ "bio": "b".repeat(2000) })),
        )
        .await;
    assert_eq!(too_long.status, StatusCode::BAD_REQUEST);
}
