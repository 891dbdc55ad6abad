//! HTTP Handlers
//!
//! Request handlers for all HTTP endpoints.

pub mod channels;
pub mod health;
pub mod messages;
pub mod servers;
pub mod users;
