//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure. Every test app runs
//! against the in-process store with HS256 tokens.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use uuid::Uuid;

use retrocomm_server::config::Settings;
use retrocomm_server::startup::{build_state, create_app, AppState, BackgroundTasks};

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// A user with a signed bearer token
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub token: String,
}

impl TestUser {
    pub fn new(username: &str) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            username: username.to_string(),
            token: sign_token(&id.to_string(), Some(username), 3600),
        }
    }
}

/// Sign an HS256 token with the test secret.
pub fn sign_token(sub: &str, username: Option<&str>, expires_in_secs: i64) -> String {
    let claims = json!({
        "sub": sub,
        "exp": chrono::Utc::now().timestamp() + expires_in_secs,
        "preferred_username": username,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// A decoded HTTP response
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// The `error.kind` field of an error body
    pub fn error_kind(&self) -> &str {
        self.body["error"]["kind"].as_str().unwrap_or_default()
    }
}

/// Test application builder
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _tasks: BackgroundTasks,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Build with adjusted settings
    pub async fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::in_memory(TEST_SECRET).unwrap();
        configure(&mut settings);

        let (state, tasks) = build_state(settings).await.unwrap();
        Self {
            router: create_app(state.clone()),
            state,
            _tasks: tasks,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> TestResponse {
        self.request(Method::GET, uri, Some(&user.token), None).await
    }

    pub async fn post(&self, uri: &str, user: &TestUser, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(&user.token), Some(body))
            .await
    }

    /// Create a server and return `(server_id, general_channel_id)`.
    pub async fn create_server(&self, owner: &TestUser, name: &str) -> (String, String) {
        let response = self.post("/servers", owner, json!({ "name": name })).await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);

        let server_id = response.body["id"].as_str().unwrap().to_string();
        let general = response.body["channels"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "general")
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        (server_id, general)
    }

    pub async fn join(&self, server_id: &str, user: &TestUser) {
        let response = self
            .request(
                Method::POST,
                &format!("/servers/{}/members", server_id),
                Some(&user.token),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    }

    pub async fn post_message(&self, channel_id: &str, user: &TestUser, content: &str) -> Value {
        let response = self
            .post(
                &format!("/channels/{}/messages", channel_id),
                user,
                json!({ "content": content }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body
    }

    /// Serve on an ephemeral port for WebSocket tests.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

/// Client side of a `/stream` connection
pub struct StreamClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StreamClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = connect_async(format!("ws://{}/stream", addr))
            .await
            .unwrap();
        Self { socket }
    }

    /// Connect, authenticate and consume the `ready` frame.
    pub async fn authenticated(addr: SocketAddr, user: &TestUser) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(json!({ "t": "auth", "token": user.token })).await;
        let ready = client.recv().await;
        assert_eq!(ready["t"], "ready", "{:?}", ready);
        client
    }

    pub async fn send(&mut self, frame: Value) {
        self.socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    /// Next JSON frame; panics after two seconds.
    pub async fn recv(&mut self) -> Value {
        self.try_recv(Duration::from_secs(2))
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next JSON frame, or `None` on timeout or close.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(wait, self.socket.next()).await.ok()??;
            match msg.ok()? {
                Message::Text(text) => return serde_json::from_str(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    pub async fn subscribe(&mut self, channel_id: &str, since_seq: Option<i64>) {
        let mut frame = json!({ "t": "sub", "channel_id": channel_id });
        if let Some(since) = since_seq {
            frame["since_seq"] = json!(since);
        }
        self.send(frame).await;
    }
}
