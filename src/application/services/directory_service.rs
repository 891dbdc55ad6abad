//! Directory Service
//!
//! Servers, channels and memberships.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::services::Authorizer;
use crate::domain::{Channel, ChannelKind, CreatedServer, JoinOutcome, Server, Store};
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

pub struct DirectoryService {
    store: Arc<dyn Store>,
    authorizer: Arc<Authorizer>,
    ids: Arc<SnowflakeGenerator>,
}

impl DirectoryService {
    pub fn new(
        store: Arc<dyn Store>,
        authorizer: Arc<Authorizer>,
        ids: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            store,
            authorizer,
            ids,
        }
    }

    /// Create a server owned by `owner`, with its default channels.
    pub async fn create_server(
        &self,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<CreatedServer, AppError> {
        let created = self
            .store
            .create_server(
                self.ids.generate(),
                owner,
                name,
                description,
                [self.ids.generate(), self.ids.generate()],
            )
            .await?;

        tracing::info!(
            server_id = created.server.id,
            owner_id = %owner,
            "Server created"
        );
        Ok(created)
    }

    pub async fn list_servers(&self, user_id: Uuid) -> Result<Vec<Server>, AppError> {
        Ok(self.store.list_user_servers(user_id).await?)
    }

    /// Owner only. Non-members get `not_found`, members `forbidden`.
    pub async fn create_channel(
        &self,
        user_id: Uuid,
        server_id: i64,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, AppError> {
        self.require_visible(user_id, server_id).await?;
        self.authorizer.require_owner(user_id, server_id).await?;

        let channel = self
            .store
            .create_channel(self.ids.generate(), server_id, name, kind)
            .await?;

        tracing::info!(server_id, channel_id = channel.id, kind = %kind, "Channel created");
        Ok(channel)
    }

    pub async fn list_channels(&self, user_id: Uuid, server_id: i64) -> Result<Vec<Channel>, AppError> {
        self.require_visible(user_id, server_id).await?;
        Ok(self.store.list_server_channels(server_id).await?)
    }

    /// Join by server id. Idempotent.
    pub async fn join_server(&self, user_id: Uuid, server_id: i64) -> Result<JoinOutcome, AppError> {
        let outcome = self.store.join_server(server_id, user_id).await?;
        self.authorizer.invalidate(server_id, user_id);

        if !outcome.already {
            tracing::info!(server_id, user_id = %user_id, "Member joined");
        }
        Ok(outcome)
    }

    /// Leave a server. The owner cannot leave.
    pub async fn leave_server(&self, user_id: Uuid, server_id: i64) -> Result<(), AppError> {
        let removed = self.store.leave_server(server_id, user_id).await?;
        self.authorizer.invalidate(server_id, user_id);

        if !removed {
            return Err(AppError::NotFound("Server not found".into()));
        }
        tracing::info!(server_id, user_id = %user_id, "Member left");
        Ok(())
    }

    async fn require_visible(&self, user_id: Uuid, server_id: i64) -> Result<(), AppError> {
        if self.authorizer.is_member(user_id, server_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound("Server not found".into()))
        }
    }
}
