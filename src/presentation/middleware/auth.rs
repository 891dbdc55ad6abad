//! Authentication Middleware
//!
//! Bearer token validation for protected routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use uuid::Uuid;

use crate::shared::error::AppError;
use crate::startup::AppState;

/// Authenticated user extension
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Authentication middleware that verifies the bearer token and makes sure
/// the user has a profile row.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();

    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| AppError::Unauthenticated("Missing bearer token".into()))?;

    let user_id = state.authorizer.authenticate(bearer.token()).await?;

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}
