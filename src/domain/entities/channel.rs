//! Channel entity.
//!
//! Maps to the `channels` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel kinds matching the PostgreSQL ENUM `channel_kind`.
///
/// Only `text` channels carry messages; `voice` is declared in the schema
/// without a media plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Text,
    Voice,
}

impl ChannelKind {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }

    /// Parse the database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }

    pub fn carries_messages(&self) -> bool {
        matches!(self, Self::Text)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named message log within a server.
///
/// Maps to the `channels` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - server_id: BIGINT NOT NULL REFERENCES servers(id) ON DELETE CASCADE
/// - name: VARCHAR(64) NOT NULL, lowercase, UNIQUE (server_id, name)
/// - kind: channel_kind NOT NULL DEFAULT 'text'
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
}
