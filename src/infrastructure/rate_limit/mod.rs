//! Per-user token-bucket rate limiting.
//!
//! Two backends share the same bucket semantics:
//! - `LocalRateLimiter`: in-process, one bucket map per worker
//! - `RedisRateLimiter`: Lua script, buckets shared across workers

pub mod distributed;
pub mod local;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::RateLimitSettings;

pub use distributed::RedisRateLimiter;
pub use local::LocalRateLimiter;

/// Named quotas applied by the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quota {
    /// `POST /channels/{id}/messages`
    MessagePost,
    /// Every other authenticated request
    Read,
}

impl Quota {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quota::MessagePost => "message_post",
            Quota::Read => "read",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            Quota::MessagePost => "rl:post",
            Quota::Read => "rl:read",
        }
    }
}

/// Bucket capacity and the time it takes to refill from empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaConfig {
    pub capacity: u32,
    pub refill_ms: u64,
}

impl QuotaConfig {
    /// Tokens regained per millisecond
    pub fn rate_per_ms(&self) -> f64 {
        f64::from(self.capacity) / self.refill_ms.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaTable {
    pub message_post: QuotaConfig,
    pub read: QuotaConfig,
}

impl QuotaTable {
    pub fn get(&self, quota: Quota) -> QuotaConfig {
        match quota {
            Quota::MessagePost => self.message_post,
            Quota::Read => self.read,
        }
    }
}

impl From<&RateLimitSettings> for QuotaTable {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            message_post: QuotaConfig {
                capacity: settings.message_post_capacity,
                refill_ms: settings.message_post_window_secs * 1000,
            },
            read: QuotaConfig {
                capacity: settings.read_capacity,
                refill_ms: settings.read_window_secs * 1000,
            },
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            message_post: QuotaConfig {
                capacity: 30,
                refill_ms: 10_000,
            },
            read: QuotaConfig {
                capacity: 300,
                refill_ms: 60_000,
            },
        }
    }
}

/// Outcome of taking one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_ms: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Rate limiter seam used by the edge middleware.
///
/// Backend failures must fail open: return `Allowed` and log.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, quota: Quota, user_id: Uuid) -> Decision;

    /// Forget buckets that have refilled completely. Returns how many went.
    /// Backends whose keys expire on their own keep the default.
    fn evict_idle(&self) -> usize {
        0
    }
}

/// Token bucket state: fractional tokens and the time they were computed.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    tokens: f64,
    updated_at_ms: u64,
}

impl TokenBucket {
    pub fn full(config: QuotaConfig, now_ms: u64) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            updated_at_ms: now_ms,
        }
    }

    /// Untouched for a full refill period, so indistinguishable from a new bucket.
    pub fn is_idle(&self, config: QuotaConfig, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.updated_at_ms) >= config.refill_ms
    }

    /// Refill for the elapsed time, then try to take one token.
    pub fn take(&mut self, config: QuotaConfig, now_ms: u64) -> Decision {
        let rate = config.rate_per_ms();
        let elapsed = now_ms.saturating_sub(self.updated_at_ms) as f64;
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(config.capacity));
        self.updated_at_ms = now_ms.max(self.updated_at_ms);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Allowed {
                remaining: self.tokens.floor() as u32,
            }
        } else {
            Decision::Limited {
                retry_after_ms: ((1.0 - self.tokens) / rate).ceil() as u64,
            }
        }
    }
}
