//! Server Handlers

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use crate::application::dto::request::CreateServerRequest;
use crate::application::dto::response::{MembershipResponse, ServerResponse};
use crate::presentation::http::extractors::{parse_id, ValidatedJson};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Create a server with its default channels
pub async fn create_server(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(body): ValidatedJson<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), AppError> {
    let created = state
        .directory
        .create_server(auth.user_id, &body.name, body.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Servers the current user belongs to
pub async fn list_servers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<ServerResponse>>, AppError> {
    let servers = state.directory.list_servers(auth.user_id).await?;
    Ok(Json(servers.into_iter().map(ServerResponse::from).collect()))
}

/// Join a server by id
pub async fn join_server(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(server_id): Path<String>,
) -> Result<Json<MembershipResponse>, AppError> {
    let server_id = parse_id(&server_id, "server")?;
    let outcome = state.directory.join_server(auth.user_id, server_id).await?;
    Ok(Json(outcome.into()))
}

/// Leave a server
pub async fn leave_server(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(server_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let server_id = parse_id(&server_id, "server")?;
    state.directory.leave_server(auth.user_id, server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
