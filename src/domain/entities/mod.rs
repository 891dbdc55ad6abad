//! # Domain Entities
//!
//! All entities map directly to their corresponding database tables.
//!
//! - **User**: profile referenced by `user_id`; created on first authentication
//! - **Server**: a community owning channels; its owner is always a member
//! - **Membership**: grant letting a user read and write a server's channels
//! - **Channel**: a named append-only message log within a server
//! - **Message**: a post in a channel, ordered by a dense per-channel `seq`

mod channel;
mod member;
mod message;
mod server;
mod user;

pub use channel::{Channel, ChannelKind};
pub use member::{JoinOutcome, Membership};
pub use message::{Message, MessageQuery, NewMessage, PostOutcome};
pub use server::{CreatedServer, Server};
pub use user::User;
