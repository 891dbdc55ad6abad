//! Custom Extractors
//!
//! JSON bodies and query strings whose rejections use the API error shape.

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::shared::error::AppError;
use crate::shared::snowflake;
use crate::shared::validation::validation_error;

/// JSON body that is deserialized and then validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => {
                    AppError::PayloadTooLarge("Request body too large".into())
                }
                _ => AppError::Invalid(rejection.body_text()),
            })?;
        value.validate().map_err(validation_error)?;
        Ok(Self(value))
    }
}

/// Query string extractor rejecting with `invalid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::Invalid(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Parse a snowflake path segment.
pub fn parse_id(raw: &str, what: &str) -> Result<i64, AppError> {
    snowflake::from_string(raw).map_err(|_| AppError::Invalid(format!("Invalid {} ID", what)))
}
