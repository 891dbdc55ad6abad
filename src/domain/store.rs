//! The Store: durable persistence of servers, members, channels and messages.
//!
//! Implemented by `PgStore` (Postgres) and `MemoryStore` (single process).
//! Every implementation must uphold the per-channel `seq` invariants:
//! dense, gap-free, starting at 1, assigned at commit time under a lock that
//! serializes writers to the same channel only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entities::{
    Channel, ChannelKind, CreatedServer, JoinOutcome, Message, MessageQuery, NewMessage,
    PostOutcome, Server, User,
};

/// Store error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named resource does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The user lacks membership in the owning server
    #[error("forbidden")]
    Forbidden,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    /// Content trimmed to zero length
    #[error("message content is empty")]
    Empty,

    #[error("message content too large")]
    PayloadTooLarge,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Serialization failures and deadlocks are retried on post.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Repository trait for the message service's persisted state.
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness probe used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;

    // --- Users ---

    /// Insert the user if absent; an existing row is returned unchanged.
    ///
    /// On username collision a numeric suffix is appended.
    async fn ensure_user(&self, user_id: Uuid, username: &str) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Update the mutable profile fields; `None` leaves a field unchanged.
    async fn update_profile(
        &self,
        user_id: Uuid,
        status: Option<String>,
        bio: Option<String>,
    ) -> Result<User, StoreError>;

    // --- Servers and membership ---

    /// Atomically create the server, the owner's membership and the default
    /// channels. Fails with `Conflict` when the owner already owns a server
    /// with the same name (case-insensitive).
    async fn create_server(
        &self,
        server_id: i64,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
        default_channel_ids: [i64; 2],
    ) -> Result<CreatedServer, StoreError>;

    async fn get_server(&self, server_id: i64) -> Result<Option<Server>, StoreError>;

    /// Delete a server, cascading channels, cursors, memberships and messages.
    async fn delete_server(&self, server_id: i64) -> Result<(), StoreError>;

    /// Idempotent: an existing membership yields `already = true`.
    async fn join_server(&self, server_id: i64, user_id: Uuid) -> Result<JoinOutcome, StoreError>;

    /// Remove a membership. Returns whether a row was removed.
    async fn leave_server(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError>;

    async fn is_member(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError>;

    /// Servers the user is a member of, oldest first.
    async fn list_user_servers(&self, user_id: Uuid) -> Result<Vec<Server>, StoreError>;

    // --- Channels ---

    /// Fails with `Conflict` if `(server_id, name)` exists.
    async fn create_channel(
        &self,
        channel_id: i64,
        server_id: i64,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, StoreError>;

    async fn get_channel(&self, channel_id: i64) -> Result<Option<Channel>, StoreError>;

    async fn list_server_channels(&self, server_id: i64) -> Result<Vec<Channel>, StoreError>;

    // --- Messages ---

    /// Verify membership, assign the next `seq` under the channel's cursor
    /// lock, insert and commit. A matching nonce inside the window returns the
    /// original message with `created = false`.
    async fn post_message(
        &self,
        message_id: i64,
        message: NewMessage,
    ) -> Result<PostOutcome, StoreError>;

    /// Messages in ascending `seq` order. Without bounds, the most recent
    /// `limit` messages.
    async fn list_messages(
        &self,
        channel_id: i64,
        query: MessageQuery,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// Highest committed `seq` in the channel, 0 when empty.
    async fn current_seq(&self, channel_id: i64) -> Result<i64, StoreError>;

    /// Delete messages created before `cutoff`. Returns the number removed.
    async fn purge_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
