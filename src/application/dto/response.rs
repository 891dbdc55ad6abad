//! Response DTOs
//!
//! Data structures for API response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Channel, ChannelKind, CreatedServer, JoinOutcome, Message, Server, User};
use crate::shared::snowflake;

/// User response
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub status: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            status: user.status,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

/// Server response; `channels` is present on creation
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    #[serde(with = "snowflake::as_string")]
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelResponse>>,
}

impl From<Server> for ServerResponse {
    fn from(server: Server) -> Self {
        Self {
            id: server.id,
            name: server.name,
            description: server.description,
            owner_id: server.owner_id,
            created_at: server.created_at,
            channels: None,
        }
    }
}

impl From<CreatedServer> for ServerResponse {
    fn from(created: CreatedServer) -> Self {
        let mut response = Self::from(created.server);
        response.channels = Some(created.channels.into_iter().map(Into::into).collect());
        response
    }
}

/// Channel response
#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    #[serde(with = "snowflake::as_string")]
    pub id: i64,
    #[serde(with = "snowflake::as_string")]
    pub server_id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
}

impl From<Channel> for ChannelResponse {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            server_id: channel.server_id,
            name: channel.name,
            kind: channel.kind,
            created_at: channel.created_at,
        }
    }
}

/// Message response, also embedded in stream `msg` and `history` frames
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    #[serde(with = "snowflake::as_string")]
    pub id: i64,
    #[serde(with = "snowflake::as_string")]
    pub channel_id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            channel_id: message.channel_id,
            user_id: message.user_id,
            username: message.username.clone(),
            content: message.content.clone(),
            nonce: message.nonce.clone(),
            seq: message.seq,
            created_at: message.created_at,
        }
    }
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self::from(&message)
    }
}

/// Join response
#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    #[serde(with = "snowflake::as_string")]
    pub server_id: i64,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub already: bool,
}

impl From<JoinOutcome> for MembershipResponse {
    fn from(outcome: JoinOutcome) -> Self {
        Self {
            server_id: outcome.membership.server_id,
            user_id: outcome.membership.user_id,
            joined_at: outcome.membership.joined_at,
            already: outcome.already,
        }
    }
}
