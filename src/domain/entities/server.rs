//! Server entity.
//!
//! Maps to the `servers` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Channel;

/// Represents a server in the chat system.
///
/// Maps to the `servers` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - name: VARCHAR(64) NOT NULL
/// - description: TEXT NULL
/// - owner_id: UUID NOT NULL REFERENCES users(id)
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Server name (1-64 characters)
    pub name: String,

    pub description: Option<String>,

    /// The owner is always a member
    pub owner_id: Uuid,

    pub created_at: DateTime<Utc>,
}

impl Server {
    /// Check if a user is the owner of this server.
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

/// A freshly created server together with its default channels.
#[derive(Debug, Clone)]
pub struct CreatedServer {
    pub server: Server,
    pub channels: Vec<Channel>,
}
