//! Channel Handlers

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use crate::application::dto::request::CreateChannelRequest;
use crate::application::dto::response::ChannelResponse;
use crate::presentation::http::extractors::{parse_id, ValidatedJson};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Create a channel (owner only)
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(server_id): Path<String>,
    ValidatedJson(body): ValidatedJson<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelResponse>), AppError> {
    let server_id = parse_id(&server_id, "server")?;
    let channel = state
        .directory
        .create_channel(auth.user_id, server_id, &body.name, body.kind)
        .await?;

    Ok((StatusCode::CREATED, Json(channel.into())))
}

/// List a server's channels
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(server_id): Path<String>,
) -> Result<Json<Vec<ChannelResponse>>, AppError> {
    let server_id = parse_id(&server_id, "server")?;
    let channels = state.directory.list_channels(auth.user_id, server_id).await?;
    Ok(Json(channels.into_iter().map(ChannelResponse::from).collect()))
}
