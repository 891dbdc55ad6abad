//! # RetroComm Server Library
//!
//! Realtime channel message service:
//! - HTTP API for servers, channels, membership and message history
//! - `/stream` WebSocket delivering ordered, gap-free message streams
//! - PostgreSQL (or an in-process store) as the single source of truth
//! - Optional Redis for rate limits shared across workers
//!
//! ## Architecture
//!
//! - **Domain Layer**: Entities, the `Store` trait and commit events
//! - **Application Layer**: Authorizer, message router, directory and profile services
//! - **Infrastructure Layer**: Stores, token verifiers, event bus, rate limiters, metrics
//! - **Presentation Layer**: HTTP handlers, middleware and the subscription hub
//!
//! ## Module Structure
//!
//! ```text
//! retrocomm_server/
//! +-- config/         Configuration management
//! +-- domain/         Entities, Store trait, events
//! +-- application/    Services and DTOs
//! +-- infrastructure/ Postgres/memory stores, auth, pubsub, rate limiting
//! +-- presentation/   HTTP routes, middleware, WebSocket hub
//! +-- shared/         Errors, snowflake IDs, validation helpers
//! ```

// Configuration module
pub mod config;

// Domain layer - Core types and the Store trait
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
