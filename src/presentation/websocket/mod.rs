//! Realtime stream
//!
//! The `/stream` WebSocket endpoint and the subscription hub behind it.

pub mod frames;
pub mod handler;
pub mod hub;

pub use frames::{ClientFrame, ServerFrame};
pub use handler::stream_handler;
pub use hub::{spawn_sweeper, Connection, Hub, HubConfig, HubError};
