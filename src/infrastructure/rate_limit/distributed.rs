//! Redis-backed token buckets shared by every worker process.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use super::{Decision, Quota, QuotaTable, RateLimiter};

/// Refill and take one token atomically.
///
/// Bucket state lives in a hash `{tokens, ts}` that expires after one refill
/// window.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_ms = tonumber(ARGV[2])

local now = redis.call('TIME')
local now_ms = now[1] * 1000 + math.floor(now[2] / 1000)
local rate = capacity / refill_ms

local state = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now_ms
end

local elapsed = math.max(0, now_ms - ts)
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
local retry_after = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
else
    retry_after = math.ceil((1 - tokens) / rate)
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', now_ms)
redis.call('PEXPIRE', key, refill_ms)
return {allowed, math.floor(tokens), retry_after}
"#;

#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    quotas: QuotaTable,
    script: redis::Script,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, quotas: QuotaTable) -> Self {
        Self {
            redis,
            quotas,
            script: redis::Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, quota: Quota, user_id: Uuid) -> Decision {
        let config = self.quotas.get(quota);
        let key = format!("{}:{}", quota.key_prefix(), user_id);
        let mut conn = self.redis.clone();

        let result: Result<Vec<i64>, redis::RedisError> = self
            .script
            .key(&key)
            .arg(config.capacity)
            .arg(config.refill_ms)
            .invoke_async(&mut conn)
            .await;

        match result.as_deref() {
            Ok([1, remaining, ..]) => Decision::Allowed {
                remaining: (*remaining).max(0) as u32,
            },
            Ok([0, _, retry_after, ..]) => Decision::Limited {
                retry_after_ms: (*retry_after).max(1) as u64,
            },
            Ok(other) => {
                tracing::error!(?other, quota = quota.as_str(), "Unexpected rate limiter reply");
                Decision::Allowed { remaining: 0 }
            }
            Err(e) => {
                tracing::error!(error = %e, quota = quota.as_str(), "Rate limiter Redis error");
                Decision::Allowed { remaining: 0 }
            }
        }
    }
}
