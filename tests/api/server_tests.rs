//! Server and Channel API Tests

use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{sign_token, TestApp, TestUser};

#[tokio::test]
async fn test_create_server_with_default_channels() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");

    let response = app.post("/servers", &owner, json!({ "name": "Retro" })).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["name"], "Retro");
    assert_eq!(response.body["owner_id"], owner.id.to_string());
    assert!(response.body["id"].is_string());

    let mut names: Vec<&str> = response.body["channels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["general", "random"]);
}

#[tokio::test]
async fn test_list_servers_only_shows_memberships() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let stranger = TestUser::new("vapor");
    app.create_server(&owner, "Retro").await;

    let mine = app.get("/servers", &owner).await;
    let theirs = app.get("/servers", &stranger).await;

    assert_eq!(mine.status, StatusCode::OK);
    assert_eq!(mine.body.as_array().unwrap().len(), 1);
    assert_eq!(theirs.body, json!([]));
}

#[tokio::test]
async fn test_duplicate_server_name_conflicts() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    app.create_server(&owner, "Retro").await;

    let response = app.post("/servers", &owner, json!({ "name": "retro" })).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.error_kind(), "conflict");
}

#[tokio::test]
async fn test_invalid_server_name() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");

    let response = app.post("/servers", &owner, json!({ "name": "" })).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_kind(), "invalid");
}

#[tokio::test]
async fn test_malformed_body_is_invalid() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");

    let response = app.post("/servers", &owner, json!({ "title": "Retro" })).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_kind(), "invalid");
}

#[tokio::test]
async fn test_channel_creation_permissions() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let member = TestUser::new("vapor");
    let stranger = TestUser::new("glitch");
    let (server_id, _) = app.create_server(&owner, "Retro").await;
    app.join(&server_id, &member).await;
    let uri = format!("/servers/{}/channels", server_id);

    let created = app
        .post(&uri, &owner, json!({ "name": " Lounge ", "kind": "text" }))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["name"], "lounge");
    assert_eq!(created.body["server_id"], server_id);

    let duplicate = app.post(&uri, &owner, json!({ "name": "LOUNGE" })).await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let by_member = app.post(&uri, &member, json!({ "name": "music" })).await;
    assert_eq!(by_member.status, StatusCode::FORBIDDEN);

    let by_stranger = app.post(&uri, &stranger, json!({ "name": "music" })).await;
    assert_eq!(by_stranger.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_channels_requires_membership() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let stranger = TestUser::new("glitch");
    let (server_id, _) = app.create_server(&owner, "Retro").await;
    let uri = format!("/servers/{}/channels", server_id);

    let listed = app.get(&uri, &owner).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body.as_array().unwrap().len(), 2);

    let hidden = app.get(&uri, &stranger).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);
    assert_eq!(hidden.error_kind(), "not_found");
}

#[tokio::test]
async fn test_bad_path_id_is_invalid() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");

    let response = app.get("/servers/abc/channels", &owner).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_authentication_required() {
    let app = TestApp::new().await;

    let missing = app.request(Method::GET, "/servers", None, None).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.error_kind(), "unauthenticated");

    let garbage = app
        .request(Method::GET, "/servers", Some("not-a-jwt"), None)
        .await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

    let expired = sign_token(&uuid::Uuid::new_v4().to_string(), Some("old"), -3600);
    let response = app
        .request(Method::GET, "/servers", Some(&expired), None)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"]["message"], "Token expired");
}
