//! HTTP surface: routes, handlers and extractors.

pub mod extractors;
pub mod handlers;
pub mod routes;
