//! # Domain Layer
//!
//! Core types of the realtime message service, independent of the HTTP,
//! WebSocket and database layers.
//!
//! ## Structure
//!
//! - **entities**: Users, servers, memberships, channels and messages
//! - **validation**: Normalization rules shared by every Store implementation
//! - **store**: The `Store` trait, the single source of truth
//! - **events**: Commit events and the publish/subscribe seams

pub mod entities;
pub mod events;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use entities::*;
pub use events::{CommitEvent, MembershipObserver, PublishError, Publisher, Subscriber};
pub use store::{Store, StoreError};
pub use validation::*;
