//! `/stream` WebSocket Tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{StreamClient, TestApp, TestUser};

/// Round-trip a ping so every earlier frame has been processed.
async fn barrier(client: &mut StreamClient) {
    client.send(json!({ "t": "ping" })).await;
    let pong = client.recv().await;
    assert_eq!(pong["t"], "pong", "{:?}", pong);
}

fn history_seqs(frame: &Value) -> Vec<i64> {
    frame["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_auth_then_ready() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let user = TestUser::new("neon");

    let mut client = StreamClient::authenticated(addr, &user).await;
    barrier(&mut client).await;
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;

    let mut client = StreamClient::connect(addr).await;
    client.send(json!({ "t": "auth", "token": "nope" })).await;

    let frame = client.recv().await;
    assert_eq!(frame["t"], "err");
    assert_eq!(frame["kind"], "unauthenticated");
    assert!(client.try_recv(Duration::from_secs(1)).await.is_none());
}

#[tokio::test]
async fn test_first_frame_must_be_auth() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;

    let mut client = StreamClient::connect(addr).await;
    client.send(json!({ "t": "ping" })).await;

    let frame = client.recv().await;
    assert_eq!(frame["kind"], "unauthenticated");
}

#[tokio::test]
async fn test_auth_timeout() {
    let app = TestApp::with_settings(|s| s.hub.auth_timeout_secs = 1).await;
    let addr = app.spawn().await;

    let mut client = StreamClient::connect(addr).await;

    let frame = client.recv().await;
    assert_eq!(frame["t"], "err");
    assert_eq!(frame["kind"], "unauthenticated");
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let app = TestApp::with_settings(|s| s.hub.idle_timeout_secs = 1).await;
    let addr = app.spawn().await;
    let user = TestUser::new("neon");

    let mut client = StreamClient::authenticated(addr, &user).await;

    // Silent client: the next thing we see is the close
    assert!(client.try_recv(Duration::from_secs(3)).await.is_none());
}

#[tokio::test]
async fn test_pings_keep_connection_open() {
    let app = TestApp::with_settings(|s| s.hub.idle_timeout_secs = 1).await;
    let addr = app.spawn().await;
    let user = TestUser::new("neon");

    let mut client = StreamClient::authenticated(addr, &user).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        barrier(&mut client).await;
    }
}

#[tokio::test]
async fn test_live_fan_out_in_order() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let u1 = TestUser::new("neon");
    let u2 = TestUser::new("vapor");
    let (server_id, general) = app.create_server(&u1, "Retro").await;
    app.join(&server_id, &u2).await;

    let mut client = StreamClient::authenticated(addr, &u2).await;
    client.subscribe(&general, None).await;
    barrier(&mut client).await;

    app.post_message(&general, &u1, "a").await;
    app.post_message(&general, &u1, "b").await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["t"], "msg");
    assert_eq!(first["channel_id"], general);
    assert_eq!(first["message"]["seq"], 1);
    assert_eq!(first["message"]["content"], "a");
    assert_eq!(second["message"]["seq"], 2);
    assert_eq!(second["message"]["content"], "b");
}

#[tokio::test]
async fn test_every_subscriber_sees_the_same_order() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = StreamClient::authenticated(addr, &owner).await;
        client.subscribe(&general, Some(0)).await;
        let ack = client.recv().await;
        assert_eq!(ack["t"], "history");
        assert_eq!(ack["done"], true);
        clients.push(client);
    }

    let contents: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
    let posts = contents.iter().map(|c| app.post_message(&general, &owner, c));
    futures::future::join_all(posts).await;

    for client in &mut clients {
        let mut seen = Vec::new();
        for _ in 0..10 {
            let frame = client.recv().await;
            seen.push(frame["message"]["seq"].as_i64().unwrap());
        }
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_resume_after_disconnect() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let u1 = TestUser::new("neon");
    let u2 = TestUser::new("vapor");
    let (server_id, general) = app.create_server(&u1, "Retro").await;
    app.join(&server_id, &u2).await;

    {
        let mut client = StreamClient::authenticated(addr, &u2).await;
        client.subscribe(&general, None).await;
        barrier(&mut client).await;
        for i in 1..=5 {
            app.post_message(&general, &u1, &format!("m{}", i)).await;
        }
        for seq in 1..=5 {
            assert_eq!(client.recv().await["message"]["seq"], seq);
        }
    }

    for i in 6..=8 {
        app.post_message(&general, &u1, &format!("m{}", i)).await;
    }

    let mut client = StreamClient::authenticated(addr, &u2).await;
    client.subscribe(&general, Some(5)).await;

    let history = client.recv().await;
    assert_eq!(history["t"], "history");
    assert_eq!(history_seqs(&history), vec![6, 7, 8]);
    assert_eq!(history["done"], true);

    app.post_message(&general, &u1, "live").await;
    let live = client.recv().await;
    assert_eq!(live["t"], "msg");
    assert_eq!(live["message"]["seq"], 9);
}

#[tokio::test]
async fn test_replay_is_batched() {
    let app = TestApp::with_settings(|s| s.hub.replay_batch = 2).await;
    let addr = app.spawn().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;
    for i in 1..=5 {
        app.post_message(&general, &owner, &format!("m{}", i)).await;
    }

    let mut client = StreamClient::authenticated(addr, &owner).await;
    client.subscribe(&general, Some(0)).await;

    let mut seqs = Vec::new();
    loop {
        let frame = client.recv().await;
        assert_eq!(frame["t"], "history");
        seqs.extend(history_seqs(&frame));
        if frame["done"] == true {
            break;
        }
    }
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_subscribe_errors() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let owner = TestUser::new("neon");
    let stranger = TestUser::new("glitch");
    let (_, general) = app.create_server(&owner, "Retro").await;

    let mut client = StreamClient::authenticated(addr, &stranger).await;

    client.subscribe(&general, None).await;
    let denied = client.recv().await;
    assert_eq!(denied["t"], "err");
    assert_eq!(denied["kind"], "not_found");

    client.send(json!({ "t": "shout" })).await;
    let invalid = client.recv().await;
    assert_eq!(invalid["kind"], "invalid");

    client.send(json!({ "t": "auth", "token": stranger.token })).await;
    let again = client.recv().await;
    assert_eq!(again["kind"], "invalid");

    // The connection survives errors
    barrier(&mut client).await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let owner = TestUser::new("neon");
    let (_, general) = app.create_server(&owner, "Retro").await;

    let mut client = StreamClient::authenticated(addr, &owner).await;
    client.subscribe(&general, None).await;
    client.send(json!({ "t": "unsub", "channel_id": general })).await;
    barrier(&mut client).await;

    app.post_message(&general, &owner, "unheard").await;
    barrier(&mut client).await;
}

#[tokio::test]
async fn test_connection_limit_per_user() {
    let app = TestApp::with_settings(|s| s.hub.max_conn_per_user = 1).await;
    let addr = app.spawn().await;
    let user = TestUser::new("neon");

    let _first = StreamClient::authenticated(addr, &user).await;

    let mut second = StreamClient::connect(addr).await;
    second.send(json!({ "t": "auth", "token": user.token })).await;
    let frame = second.recv().await;
    assert_eq!(frame["t"], "err");
    assert_eq!(frame["kind"], "rate_limited");
}
