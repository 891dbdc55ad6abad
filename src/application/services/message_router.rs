//! Message Router
//!
//! Stateless coordinator between the edge and the Store. Accepted posts are
//! persisted and then published on the event bus.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::services::Authorizer;
use crate::domain::{
    Channel, CommitEvent, Message, MessageQuery, NewMessage, PostOutcome, PublishError, Publisher,
    Store,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

pub struct MessageRouter {
    store: Arc<dyn Store>,
    authorizer: Arc<Authorizer>,
    publisher: Arc<dyn Publisher>,
    ids: Arc<SnowflakeGenerator>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn Store>,
        authorizer: Arc<Authorizer>,
        publisher: Arc<dyn Publisher>,
        ids: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            store,
            authorizer,
            publisher,
            ids,
        }
    }

    async fn channel(&self, channel_id: i64) -> Result<Channel, AppError> {
        self.store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Channel not found".into()))
    }

    /// Persist a post and publish the commit.
    ///
    /// Once the Store call starts it runs to completion on its own task, so
    /// a caller that goes away cannot cancel a commit halfway.
    pub async fn post(
        &self,
        user_id: Uuid,
        channel_id: i64,
        content: String,
        nonce: Option<String>,
    ) -> Result<PostOutcome, AppError> {
        let channel = self.channel(channel_id).await?;
        self.authorizer
            .require_member(user_id, channel.server_id)
            .await?;

        let store = self.store.clone();
        let publisher = self.publisher.clone();
        let message_id = self.ids.generate();
        let new_message = NewMessage {
            channel_id,
            user_id,
            content,
            nonce,
        };

        let commit = tokio::spawn(async move {
            let outcome = store.post_message(message_id, new_message).await?;
            if outcome.created {
                metrics::record_message_posted();
                tracing::debug!(
                    channel_id,
                    seq = outcome.message.seq,
                    message_id = outcome.message.id,
                    "Message committed"
                );
                match publisher.publish(CommitEvent::new(outcome.message.clone())).await {
                    Ok(()) | Err(PublishError::NoSubscribers) => {}
                    Err(e) => tracing::warn!(error = %e, channel_id, "Commit publish failed"),
                }
            }
            Ok::<_, AppError>(outcome)
        });

        commit
            .await
            .map_err(|e| AppError::Internal(format!("Post task failed: {}", e)))?
    }

    /// Read a page of history. Non-members see `not_found`.
    pub async fn history(
        &self,
        user_id: Uuid,
        channel_id: i64,
        query: MessageQuery,
    ) -> Result<Vec<Message>, AppError> {
        let channel = self.channel(channel_id).await?;
        if !self.authorizer.is_member(user_id, channel.server_id).await? {
            return Err(AppError::NotFound("Channel not found".into()));
        }

        Ok(self.store.list_messages(channel_id, query).await?)
    }
}
