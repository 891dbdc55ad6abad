//! In-process token buckets.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{Decision, Quota, QuotaTable, RateLimiter, TokenBucket};

pub struct LocalRateLimiter {
    quotas: QuotaTable,
    buckets: DashMap<(Quota, Uuid), TokenBucket>,
    started: Instant,
}

impl LocalRateLimiter {
    pub fn new(quotas: QuotaTable) -> Self {
        Self {
            quotas,
            buckets: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// Take a token at an explicit clock reading, in milliseconds.
    pub fn check_at(&self, quota: Quota, user_id: Uuid, now_ms: u64) -> Decision {
        let config = self.quotas.get(quota);
        let mut bucket = self
            .buckets
            .entry((quota, user_id))
            .or_insert_with(|| TokenBucket::full(config, now_ms));
        bucket.take(config, now_ms)
    }

    pub fn evict_idle_at(&self, now_ms: u64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|(quota, _), bucket| !bucket.is_idle(self.quotas.get(*quota), now_ms));
        before.saturating_sub(self.buckets.len())
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self, quota: Quota, user_id: Uuid) -> Decision {
        self.check_at(quota, user_id, self.now_ms())
    }

    fn evict_idle(&self) -> usize {
        self.evict_idle_at(self.now_ms())
    }
}
