//! # Infrastructure Layer
//!
//! Implementations of the domain seams and the external services they use.
//!
//! ## Structure
//!
//! - **store**: `PgStore` and `MemoryStore`
//! - **database**: PostgreSQL pool and migrations
//! - **pubsub**: In-process event bus and the LISTEN/NOTIFY relay
//! - **auth**: Bearer token verifiers
//! - **rate_limit**: Token-bucket limiters
//! - **metrics**: Prometheus registry
//! - **retention**: Expired message sweeper

pub mod auth;
pub mod database;
pub mod metrics;
pub mod pubsub;
pub mod rate_limit;
pub mod retention;
pub mod store;
