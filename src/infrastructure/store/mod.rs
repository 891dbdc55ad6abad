//! Store implementations.
//!
//! - `PgStore`: PostgreSQL, shared by every worker process
//! - `MemoryStore`: single process, used for development and tests

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
