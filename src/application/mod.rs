//! Application Layer
//!
//! Services coordinating the Store, the authorizer and the event bus, plus
//! the request/response DTOs used by the edge.

pub mod dto;
pub mod services;
