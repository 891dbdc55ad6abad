//! Commit events and the publish/subscribe seams.
//!
//! The router publishes a `CommitEvent` after every successful message
//! commit. Delivery to subscribers is best-effort; gaps are repaired by the
//! resync protocol.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::Message;

/// Notification emitted after a message commit.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub channel_id: i64,
    pub message: Arc<Message>,
}

impl CommitEvent {
    pub fn new(message: Message) -> Self {
        Self {
            channel_id: message.channel_id,
            message: Arc::new(message),
        }
    }

    pub fn seq(&self) -> i64 {
        self.message.seq
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no active subscribers")]
    NoSubscribers,

    #[error("publish failed: {0}")]
    Failed(String),
}

/// Sink for commit events.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: CommitEvent) -> Result<(), PublishError>;
}

/// Consumer of commit events.
pub trait Subscriber: Send + Sync {
    fn on_commit(&self, event: &CommitEvent);

    /// Events may have been lost upstream; every subscription must resync.
    fn on_overflow(&self) {}
}

/// Told about membership rows changing, possibly in another process.
pub trait MembershipObserver: Send + Sync {
    fn membership_changed(&self, server_id: i64, user_id: Uuid);
}
