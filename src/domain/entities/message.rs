//! Message entity.
//!
//! Maps to the `messages` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a message in a channel.
///
/// Maps to the `messages` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - channel_id: BIGINT NOT NULL REFERENCES channels(id) ON DELETE CASCADE
/// - user_id: UUID NOT NULL REFERENCES users(id)
/// - username: VARCHAR(32) NOT NULL (author name at post time)
/// - content: TEXT NOT NULL (1-4000 characters after trim)
/// - nonce: VARCHAR(64) NULL (client idempotency key)
/// - seq: BIGINT NOT NULL, UNIQUE (channel_id, seq)
/// - created_at: TIMESTAMPTZ NOT NULL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake ID (primary key)
    pub id: i64,

    pub channel_id: i64,

    /// Author user ID
    pub user_id: Uuid,

    /// Author username snapshot
    pub username: String,

    pub content: String,

    pub nonce: Option<String>,

    /// Dense, gap-free position within the channel, starting at 1
    pub seq: i64,

    /// Server-assigned, non-decreasing along `seq`
    pub created_at: DateTime<Utc>,
}

/// Input to `Store::post_message`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: i64,
    pub user_id: Uuid,
    pub content: String,
    pub nonce: Option<String>,
}

/// Result of a post: the persisted message and whether this call inserted it.
///
/// `created` is false when a nonce matched an earlier post.
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub message: Message,
    pub created: bool,
}

/// Keyset bounds for `Store::list_messages`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Only messages with `seq < before_seq`
    pub before_seq: Option<i64>,
    /// Only messages with `seq > after_seq`
    pub after_seq: Option<i64>,
    pub limit: Option<u32>,
}

impl MessageQuery {
    pub fn after(after_seq: i64, limit: u32) -> Self {
        Self {
            before_seq: None,
            after_seq: Some(after_seq),
            limit: Some(limit),
        }
    }

    /// The effective limit, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(crate::domain::DEFAULT_PAGE_SIZE)
            .clamp(1, crate::domain::MAX_PAGE_SIZE)
    }
}
