//! Message Handlers

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use crate::application::dto::request::{MessageQueryParams, PostMessageRequest};
use crate::application::dto::response::MessageResponse;
use crate::presentation::http::extractors::{parse_id, ApiQuery, ValidatedJson};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Read channel history, ascending by `seq`
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(channel_id): Path<String>,
    ApiQuery(params): ApiQuery<MessageQueryParams>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let channel_id = parse_id(&channel_id, "channel")?;
    let messages = state
        .router
        .history(auth.user_id, channel_id, params.into())
        .await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// Post a message. A replayed nonce answers 200 with the original message.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(channel_id): Path<String>,
    ValidatedJson(body): ValidatedJson<PostMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let channel_id = parse_id(&channel_id, "channel")?;
    let outcome = state
        .router
        .post(auth.user_id, channel_id, body.content, body.nonce)
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.message.into())))
}
