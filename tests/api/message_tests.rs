//! Message API Tests

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{TestApp, TestUser};

fn seqs(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_server_and_post() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;

    let posted = app.post_message(&general, &owner, "hi").await;
    assert_eq!(posted["seq"], 1);
    assert_eq!(posted["content"], "hi");
    assert_eq!(posted["username"], "neon");
    assert_eq!(posted["channel_id"], general);

    let history = app
        .get(&format!("/channels/{}/messages", general), &owner)
        .await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(seqs(&history.body), vec![1]);
    assert_eq!(history.body[0]["id"], posted["id"]);
}

#[tokio::test]
async fn test_content_is_trimmed_and_bounded() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;
    let uri = format!("/channels/{}/messages", general);

    let trimmed = app.post(&uri, &owner, json!({ "content": "  hello  " })).await;
    assert_eq!(trimmed.body["content"], "hello");

    let blank = app.post(&uri, &owner, json!({ "content": "   " })).await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);
    assert_eq!(blank.error_kind(), "invalid");

    let huge = app
        .post(&uri, &owner, json!({ "content": "x".repeat(4001) }))
        .await;
    assert_eq!(huge.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(huge.error_kind(), "payload_too_large");

    let exact = app
        .post(&uri, &owner, json!({ "content": "x".repeat(4000) }))
        .await;
    assert_eq!(exact.status, StatusCode::CREATED);
    assert_eq!(exact.body["seq"], 2);
}

#[tokio::test]
async fn test_nonce_idempotency() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;
    let uri = format!("/channels/{}/messages", general);
    app.post_message(&general, &owner, "one").await;
    app.post_message(&general, &owner, "two").await;

    let body = json!({ "content": "x", "nonce": "N1-0123456789abcdef" });
    let first = app.post(&uri, &owner, body.clone()).await;
    let second = app.post(&uri, &owner, body).await;

    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.body["seq"], 3);
    assert_eq!(second.body["seq"], 3);
    assert_eq!(first.body["id"], second.body["id"]);

    let history = app.get(&uri, &owner).await;
    assert_eq!(seqs(&history.body), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_short_nonce_is_invalid() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;

    let response = app
        .post(
            &format!("/channels/{}/messages", general),
            &owner,
            json!({ "content": "x", "nonce": "short" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_member_post_is_forbidden() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let stranger = TestUser::new("glitch");
    let (_, general) = app.create_server(&owner, "Retro").await;
    app.post_message(&general, &owner, "first").await;
    let uri = format!("/channels/{}/messages", general);

    let response = app.post(&uri, &stranger, json!({ "content": "let me in" })).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.error_kind(), "forbidden");

    // Reads by non-members do not reveal the channel
    let read = app.get(&uri, &stranger).await;
    assert_eq!(read.status, StatusCode::NOT_FOUND);

    let history = app.get(&uri, &owner).await;
    assert_eq!(seqs(&history.body), vec![1]);
}

#[tokio::test]
async fn test_unknown_and_voice_channels() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (server_id, _) = app.create_server(&owner, "Retro").await;

    let missing = app
        .post("/channels/12345/messages", &owner, json!({ "content": "hi" }))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let voice = app
        .post(
            &format!("/servers/{}/channels", server_id),
            &owner,
            json!({ "name": "hangout", "kind": "voice" }),
        )
        .await;
    let voice_id = voice.body["id"].as_str().unwrap();
    let response = app
        .post(
            &format!("/channels/{}/messages", voice_id),
            &owner,
            json!({ "content": "hi" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_pagination() {
    let app = TestApp::new().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;
    for i in 1..=10 {
        app.post_message(&general, &owner, &format!("m{}", i)).await;
    }
    let uri = format!("/channels/{}/messages", general);

    let latest = app.get(&format!("{}?limit=3", uri), &owner).await;
    assert_eq!(seqs(&latest.body), vec![8, 9, 10]);

    let older = app
        .get(&format!("{}?before_seq=8&limit=3", uri), &owner)
        .await;
    assert_eq!(seqs(&older.body), vec![5, 6, 7]);

    let newer = app
        .get(&format!("{}?after_seq=4&limit=3", uri), &owner)
        .await;
    assert_eq!(seqs(&newer.body), vec![5, 6, 7]);

    let tail = app
        .get(&format!("{}?after_seq=8&limit=50", uri), &owner)
        .await;
    assert_eq!(seqs(&tail.body), vec![9, 10]);

    let past_end = app.get(&format!("{}?after_seq=10", uri), &owner).await;
    assert_eq!(past_end.body, json!([]));

    let bad = app.get(&format!("{}?limit=lots", uri), &owner).await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_rate_limit() {
    let app = TestApp::with_settings(|s| {
        s.rate_limit.message_post_capacity = 2;
        s.rate_limit.message_post_window_secs = 60;
    })
    .await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;
    let uri = format!("/channels/{}/messages", general);

    app.post_message(&general, &owner, "one").await;
    app.post_message(&general, &owner, "two").await;
    let limited = app.post(&uri, &owner, json!({ "content": "three" })).await;

    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.error_kind(), "rate_limited");
    assert!(limited.body["error"]["retry_after_ms"].as_u64().unwrap() > 0);
    assert!(limited.headers.contains_key(header::RETRY_AFTER));

    // Reads draw from a separate bucket
    let history = app.get(&uri, &owner).await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(seqs(&history.body), vec![1, 2]);
}
