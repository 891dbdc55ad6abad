//! Commit event fan-out plumbing.
//!
//! - `EventBus`: in-process broadcast of `CommitEvent`s
//! - `pg_relay`: LISTEN/NOTIFY bridge that republishes commits made by other
//!   worker processes on the local bus

pub mod bus;
pub mod pg_relay;

pub use bus::{spawn_dispatcher, EventBus};
pub use pg_relay::{spawn_pg_relay, RelayTargets};
