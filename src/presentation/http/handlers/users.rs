//! User Handlers

use axum::{
    extract::{Extension, State},
    Json,
};

use crate::application::dto::request::UpdateProfileRequest;
use crate::application::dto::response::UserResponse;
use crate::presentation::http::extractors::ValidatedJson;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Get current user
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.profiles.me(auth.user_id).await?;
    Ok(Json(user.into()))
}

/// Update status and bio
pub async fn update_current_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(body): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .profiles
        .update(auth.user_id, body.status, body.bio)
        .await?;
    Ok(Json(user.into()))
}
