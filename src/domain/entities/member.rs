//! Server membership entity.
//!
//! Maps to the `server_members` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's membership in a server.
///
/// Maps to the `server_members` table:
/// - server_id: BIGINT NOT NULL REFERENCES servers(id) ON DELETE CASCADE (composite PK)
/// - user_id: UUID NOT NULL REFERENCES users(id) (composite PK)
/// - joined_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
///
/// Removing a membership revokes access but keeps the user's past messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub server_id: i64,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

/// Result of an idempotent join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub membership: Membership,
    /// True when the membership already existed
    pub already: bool,
}
