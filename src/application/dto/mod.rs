//! Data Transfer Objects
//!
//! Request and response bodies for the HTTP surface. Snowflake ids are
//! serialized as decimal strings.

pub mod request;
pub mod response;

pub use request::*;
pub use response::*;
