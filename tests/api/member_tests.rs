//! Membership API Tests

use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{TestApp, TestUser};

#[tokio::test]
async fn test_join_is_idempotent() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let member = TestUser::new("vapor");
    let (server_id, _) = app.create_server(&owner, "Retro").await;
    let uri = format!("/servers/{}/members", server_id);

    let first = app
        .request(Method::POST, &uri, Some(&member.token), None)
        .await;
    let second = app
        .request(Method::POST, &uri, Some(&member.token), None)
        .await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["already"], false);
    assert_eq!(first.body["server_id"], server_id);
    assert_eq!(first.body["user_id"], member.id.to_string());
    assert_eq!(second.body["already"], true);
    assert_eq!(second.body["joined_at"], first.body["joined_at"]);
}

#[tokio::test]
async fn test_join_unknown_server() {
    let app = TestApp::new().await;
    let member = TestUser::new("vapor");

    let response = app
        .request(Method::POST, "/servers/999/members", Some(&member.token), None)
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_member_can_post_after_join_and_not_after_leave() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let member = TestUser::new("vapor");
    let (server_id, general) = app.create_server(&owner, "Retro").await;
    app.join(&server_id, &member).await;

    app.post_message(&general, &member, "hello").await;

    let left = app
        .request(
            Method::DELETE,
            &format!("/servers/{}/members/@me", server_id),
            Some(&member.token),
            None,
        )
        .await;
    assert_eq!(left.status, StatusCode::NO_CONTENT);

    let response = app
        .post(
            &format!("/channels/{}/messages", general),
            &member,
            json!({ "content": "still here?" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    // Messages outlive the membership
    let history = app
        .get(&format!("/channels/{}/messages", general), &owner)
        .await;
    assert_eq!(history.body[0]["username"], "vapor");
}

#[tokio::test]
async fn test_leave_rules() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let stranger = TestUser::new("glitch");
    let (server_id, _) = app.create_server(&owner, "Retro").await;
    let uri = format!("/servers/{}/members/@me", server_id);

    let owner_leave = app
        .request(Method::DELETE, &uri, Some(&owner.token), None)
        .await;
    assert_eq!(owner_leave.status, StatusCode::CONFLICT);

    let stranger_leave = app
        .request(Method::DELETE, &uri, Some(&stranger.token), None)
        .await;
    assert_eq!(stranger_leave.status, StatusCode::NOT_FOUND);
}
