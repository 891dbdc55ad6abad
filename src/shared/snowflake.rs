//! Snowflake ID Generator
//!
//! Twitter-style distributed unique ID generation for servers, channels and
//! messages. IDs travel as decimal strings in JSON.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serializer};

/// RetroComm epoch (2024-01-01T00:00:00.000Z)
pub const RETROCOMM_EPOCH: u64 = 1_704_067_200_000;

const SEQUENCE_BITS: u64 = 12;
const MACHINE_BITS: u64 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake ID generator
///
/// Layout: 41 bits of milliseconds since the epoch, 10 bits of machine id,
/// 12 bits of per-millisecond sequence. The timestamp and sequence share one
/// atomic word so concurrent callers never observe the same pair.
pub struct SnowflakeGenerator {
    machine_id: u64,
    epoch: u64,
    /// (timestamp << 12) | sequence of the last issued id
    state: AtomicU64,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(machine_id: u64) -> Self {
        Self::with_epoch(machine_id, RETROCOMM_EPOCH)
    }

    pub fn with_epoch(machine_id: u64, epoch: u64) -> Self {
        Self {
            machine_id: machine_id & ((1 << MACHINE_BITS) - 1),
            epoch,
            state: AtomicU64::new(0),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> i64 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let now = current_timestamp().saturating_sub(self.epoch);
            let last_ts = current >> SEQUENCE_BITS;
            let last_seq = current & SEQUENCE_MASK;

            let next = if now > last_ts {
                now << SEQUENCE_BITS
            } else if last_seq < SEQUENCE_MASK {
                // Same millisecond (or clock moved back): bump the sequence
                (last_ts << SEQUENCE_BITS) | (last_seq + 1)
            } else {
                // Sequence exhausted: borrow the next millisecond
                (last_ts + 1) << SEQUENCE_BITS
            };

            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let ts = next >> SEQUENCE_BITS;
                    let seq = next & SEQUENCE_MASK;
                    let id = (ts << (MACHINE_BITS + SEQUENCE_BITS))
                        | (self.machine_id << SEQUENCE_BITS)
                        | seq;
                    return id as i64;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Extract timestamp (ms since Unix epoch) from snowflake ID
pub fn extract_timestamp(snowflake: i64) -> u64 {
    ((snowflake as u64) >> (MACHINE_BITS + SEQUENCE_BITS)) + RETROCOMM_EPOCH
}

/// Parse snowflake from string
pub fn from_string(s: &str) -> Result<i64, std::num::ParseIntError> {
    s.trim().parse()
}

/// Serde helpers: ids serialize as strings and deserialize from strings or numbers.
pub mod as_string {
    use super::*;

    pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(i64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(n),
            Repr::Str(s) => from_string(&s).map_err(serde::de::Error::custom),
        }
    }
}
