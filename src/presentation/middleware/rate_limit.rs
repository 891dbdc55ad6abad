//! Rate Limiting Middleware
//!
//! Per-user token buckets: `message_post` for posting messages, `read` for
//! every other authenticated request. Runs after authentication.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, Method},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::infrastructure::rate_limit::{Decision, Quota};
use crate::shared::error::AppError;
use crate::startup::AppState;

const MESSAGES_ROUTE: &str = "/channels/{channel_id}/messages";

/// Pick the quota a request draws from.
pub fn quota_for(method: &Method, route: Option<&str>) -> Quota {
    match (method, route) {
        (&Method::POST, Some(MESSAGES_ROUTE)) => Quota::MessagePost,
        _ => Quota::Read,
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(auth) = request.extensions().get::<AuthUser>().copied() else {
        return Ok(next.run(request).await);
    };

    let route = request.extensions().get::<MatchedPath>().map(|p| p.as_str());
    let quota = quota_for(request.method(), route);

    match state.rate_limiter.check(quota, auth.user_id).await {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if let Ok(v) = header::HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("X-RateLimit-Remaining", v);
            }
            Ok(response)
        }
        Decision::Limited { retry_after_ms } => {
            tracing::warn!(
                user_id = %auth.user_id,
                quota = quota.as_str(),
                retry_after_ms,
                "Rate limit exceeded"
            );
            Err(AppError::RateLimited { retry_after_ms })
        }
    }
}
