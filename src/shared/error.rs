//! Application Error Types
//!
//! Centralized error handling with Axum integration. Every error maps 1:1 to
//! a wire `kind` shared by the HTTP surface and the streaming transport.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::StoreError;
use crate::infrastructure::auth::AuthError;

/// Wire-level error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Invalid,
    PayloadTooLarge,
    RateLimited,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Invalid => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Invalid(_) => ErrorKind::Invalid,
            AppError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            AppError::RateLimited { .. } => ErrorKind::RateLimited,
            AppError::Internal(_) | AppError::Database(_) | AppError::Redis(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Client-facing message. Internal failures are logged under a fresh
    /// correlation id and only the id is surfaced.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Invalid(msg)
            | AppError::PayloadTooLarge(msg) => msg.clone(),
            AppError::RateLimited { .. } => "You are being rate limited".into(),
            AppError::Internal(_) | AppError::Database(_) | AppError::Redis(_) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(correlation_id = %correlation_id, error = %self, "Internal error");
                format!("Internal server error (ref {})", correlation_id)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            StoreError::Forbidden => AppError::Forbidden("Not a member of this server".into()),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Invalid(msg) => AppError::Invalid(msg),
            StoreError::Empty => AppError::Invalid("Message content is empty".into()),
            StoreError::PayloadTooLarge => AppError::PayloadTooLarge(format!(
                "Message content exceeds {} characters",
                crate::domain::MAX_CONTENT_CHARS
            )),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Unavailable(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired => AppError::Unauthenticated("Token expired".into()),
            AuthError::Invalid(reason) => {
                tracing::debug!(%reason, "Rejected bearer token");
                AppError::Unauthenticated("Invalid token".into())
            }
            AuthError::KeysUnavailable(reason) => {
                tracing::error!(%reason, "Token verification keys unavailable");
                AppError::Unauthenticated("Unable to verify token".into())
            }
        }
    }
}

/// Error response body: `{ "error": { "kind", "message", "retry_after_ms"? } }`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let retry_after_ms = match &self {
            AppError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorBody {
                kind,
                message: self.public_message(),
                retry_after_ms,
            },
        };

        let mut response = (kind.status(), Json(body)).into_response();

        if let Some(ms) = retry_after_ms {
            let secs = ms.div_ceil(1000).max(1);
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }

        response
    }
}
