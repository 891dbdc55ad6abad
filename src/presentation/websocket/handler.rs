//! Stream Connection Handler
//!
//! Drives one `/stream` WebSocket: authenticate, then process `sub`/`unsub`
//! frames while a writer task drains the connection's outbound queue.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use super::frames::{ClientFrame, ServerFrame};
use super::hub::{Connection, HubError};
use crate::shared::error::AppError;
use crate::startup::AppState;

type WsSink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler for `/stream`
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.settings.hub.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let hub_settings = &state.settings.hub;

    let auth_timeout = Duration::from_secs(hub_settings.auth_timeout_secs);
    let user_id = match timeout(auth_timeout, authenticate(&mut receiver, &state)).await {
        Ok(Ok(user_id)) => user_id,
        Ok(Err(Some(err))) => {
            reject(&mut sender, &err).await;
            return;
        }
        // Closed before authenticating
        Ok(Err(None)) => return,
        Err(_) => {
            tracing::debug!("Stream authentication timed out");
            reject(
                &mut sender,
                &AppError::Unauthenticated("Authentication timed out".into()),
            )
            .await;
            return;
        }
    };

    let (connection, rx) = match state.hub.register(user_id) {
        Ok(registered) => registered,
        Err(err @ HubError::TooManyConnections { .. }) => {
            reject(&mut sender, &err.into()).await;
            return;
        }
        Err(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "Failed to register stream");
            return;
        }
    };

    if write_frame(&mut sender, &ServerFrame::Ready).await.is_err() {
        state.hub.unregister(&connection);
        return;
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection.id,
        "Stream connected"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(sender, rx, connection.clone(), shutdown_rx));

    let idle = Duration::from_secs(hub_settings.idle_timeout_secs);
    loop {
        let msg = match timeout(idle, receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %connection.id, error = %e, "WebSocket error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(connection_id = %connection.id, "Stream idle timeout");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if let Err(err) = handle_frame(&text, &connection, &state).await {
                    if connection.send(ServerFrame::error(&err)).await.is_err() {
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                let err = AppError::Invalid("Binary frames are not supported".into());
                if connection.send(ServerFrame::error(&err)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pong is handled automatically by axum
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.hub.unregister(&connection);
    let _ = shutdown_tx.send(());
    let _ = writer.await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection.id,
        "Stream disconnected"
    );
}

/// Wait for the `auth` frame. `Err(None)` means the peer went away.
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Result<Uuid, Option<AppError>> {
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return Err(None),
            Ok(_) => continue,
        };

        return match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Auth { token }) => state.authorizer.authenticate(&token).await.map_err(Some),
            _ => Err(Some(AppError::Unauthenticated(
                "Expected an auth frame".into(),
            ))),
        };
    }
    Err(None)
}

async fn handle_frame(
    text: &str,
    connection: &Arc<Connection>,
    state: &AppState,
) -> Result<(), AppError> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|e| AppError::Invalid(format!("Malformed frame: {}", e)))?;

    match frame {
        ClientFrame::Sub {
            channel_id,
            since_seq,
        } => state.hub.subscribe(connection, channel_id, since_seq).await,
        ClientFrame::Unsub { channel_id } => {
            state.hub.unsubscribe(connection, channel_id);
            Ok(())
        }
        ClientFrame::Ping => Ok(connection.send(ServerFrame::Pong).await?),
        ClientFrame::Auth { .. } => Err(AppError::Invalid("Already authenticated".into())),
    }
}

/// Forward queued frames to the socket. Resync frames go out once the queue
/// ahead of them has drained.
async fn write_loop(
    mut sender: WsSink,
    mut rx: mpsc::Receiver<ServerFrame>,
    connection: Arc<Connection>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if write_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }
            _ = connection.resync_ready() => {}
        }

        if rx.is_empty() {
            for frame in connection.take_resyncs() {
                if write_frame(&mut sender, &frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn write_frame(sender: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// Send an error frame and close the socket.
async fn reject(sender: &mut WsSink, err: &AppError) {
    let _ = write_frame(sender, &ServerFrame::error(err)).await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: 1008,
            reason: err.kind().as_str().into(),
        })))
        .await;
}
