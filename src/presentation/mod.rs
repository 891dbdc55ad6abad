//! Presentation Layer
//!
//! HTTP routes, middleware and the `/stream` WebSocket endpoint.

pub mod http;
pub mod middleware;
pub mod websocket;
