//! Stream protocol frames.
//!
//! Every frame is a JSON object tagged by `t`.

use serde::{Deserialize, Serialize};

use crate::application::dto::MessageResponse;
use crate::domain::Message;
use crate::shared::error::{AppError, ErrorKind};
use crate::shared::snowflake;

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame; must arrive within the auth timeout
    Auth { token: String },
    Sub {
        #[serde(with = "snowflake::as_string")]
        channel_id: i64,
        #[serde(default)]
        since_seq: Option<i64>,
    },
    Unsub {
        #[serde(with = "snowflake::as_string")]
        channel_id: i64,
    },
    Ping,
}

/// Server -> client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready,
    Msg {
        #[serde(with = "snowflake::as_string")]
        channel_id: i64,
        message: MessageResponse,
    },
    History {
        #[serde(with = "snowflake::as_string")]
        channel_id: i64,
        messages: Vec<MessageResponse>,
        done: bool,
    },
    Resync {
        #[serde(with = "snowflake::as_string")]
        channel_id: i64,
        resume_from: i64,
    },
    Err {
        kind: ErrorKind,
        message: String,
    },
    Pong,
}

impl ServerFrame {
    pub fn msg(message: &Message) -> Self {
        ServerFrame::Msg {
            channel_id: message.channel_id,
            message: message.into(),
        }
    }

    pub fn history(channel_id: i64, messages: &[Message], done: bool) -> Self {
        ServerFrame::History {
            channel_id,
            messages: messages.iter().map(Into::into).collect(),
            done,
        }
    }

    pub fn error(err: &AppError) -> Self {
        ServerFrame::Err {
            kind: err.kind(),
            message: err.public_message(),
        }
    }
}
