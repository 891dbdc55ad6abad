//! Request DTOs
//!
//! Data structures for API request bodies and query strings.

use serde::Deserialize;
use validator::Validate;

use crate::domain::{ChannelKind, MessageQuery};

/// Create server request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateServerRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    pub name: String,

    #[validate(length(max = 1024, message = "Description must be at most 1024 characters"))]
    pub description: Option<String>,
}

/// Create channel request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateChannelRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    pub name: String,

    #[serde(default)]
    pub kind: ChannelKind,
}

/// Post message request
///
/// Content bounds are enforced after trimming by the Store, which also
/// distinguishes `invalid` from `payload_too_large`.
#[derive(Debug, Deserialize, Validate)]
pub struct PostMessageRequest {
    pub content: String,

    #[validate(length(min = 16, max = 64, message = "Nonce must be 16-64 characters"))]
    pub nonce: Option<String>,
}

/// Update profile request
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 128, message = "Status must be at most 128 characters"))]
    pub status: Option<String>,

    #[validate(length(max = 1024, message = "Bio must be at most 1024 characters"))]
    pub bio: Option<String>,
}

/// `GET /channels/{id}/messages` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct MessageQueryParams {
    pub before_seq: Option<i64>,
    pub after_seq: Option<i64>,
    pub limit: Option<u32>,
}

impl From<MessageQueryParams> for MessageQuery {
    fn from(params: MessageQueryParams) -> Self {
        MessageQuery {
            before_seq: params.before_seq,
            after_seq: params.after_seq,
            limit: params.limit,
        }
    }
}
