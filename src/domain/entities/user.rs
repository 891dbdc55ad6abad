//! User entity.
//!
//! Maps to the `users` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a user profile.
///
/// Maps to the `users` table:
/// - id: UUID PRIMARY KEY (issued by the authentication provider)
/// - username: VARCHAR(32) NOT NULL UNIQUE
/// - status: TEXT NOT NULL DEFAULT ''
/// - bio: TEXT NOT NULL DEFAULT ''
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Unique, 3-32 printable characters
    pub username: String,

    /// Free-form status line
    pub status: String,

    pub bio: String,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            status: String::new(),
            bio: String::new(),
            created_at: Utc::now(),
        }
    }
}
