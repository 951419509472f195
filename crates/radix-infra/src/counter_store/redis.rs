//! Redis counter store - fixed-window counters shared by every instance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};

use radix_core::StoreError;
use radix_core::domain::{Counter, CounterHit, expiry};
use radix_core::ports::CounterStore;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whether to fall back to the in-memory store if Redis is unavailable at startup
    pub fallback_to_memory: bool,
    /// Prefix for counter keys
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            fallback_to_memory: true,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Atomic hit: bump `count`, stamp `start` and arm the TTL on the first hit.
/// Returns `{count, pttl_ms, start_ms}`; a hit expires at `start_ms + window`.
const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])
local now_ms = tonumber(ARGV[2])

local count = redis.call('HINCRBY', key, 'count', 1)
if count == 1 then
    redis.call('HSET', key, 'start', now_ms)
    redis.call('PEXPIRE', key, window_ms)
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    redis.call('HSET', key, 'start', now_ms)
    redis.call('PEXPIRE', key, window_ms)
    ttl = window_ms
end

local start = tonumber(redis.call('HGET', key, 'start')) or now_ms
return {count, ttl, start}
"#;

/// Read-only view of a counter. Returns `{}` when the key is absent.
const PEEK_SCRIPT: &str = r#"
local key = KEYS[1]
local count = redis.call('HGET', key, 'count')
if not count then
    return {}
end
local ttl = redis.call('PTTL', key)
local start = tonumber(redis.call('HGET', key, 'start')) or 0
return {tonumber(count), ttl, start}
"#;

/// Redis-backed counter store. Expiry is delegated to Redis TTLs.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisConfig,
    increment: Script,
    peek: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Timeout(config.connect_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            increment: Script::new(INCREMENT_SCRIPT),
            peek: Script::new(PEEK_SCRIPT),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

fn millis_to_time(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let window_ms = window.as_millis().max(1) as u64;

        let result: Vec<i64> = self
            .increment
            .key(self.make_key(key))
            .arg(window_ms)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let [count, _ttl_ms, start_ms] = result[..] else {
            return Err(StoreError::Corrupt(format!(
                "unexpected script reply: {:?}",
                result
            )));
        };

        Ok(CounterHit {
            count: count.max(0) as u64,
            expires_at: expiry(millis_to_time(start_ms), window),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<Counter>, StoreError> {
        let mut conn = self.conn.clone();
        let now = Utc::now();

        let result: Vec<i64> = self
            .peek
            .key(self.make_key(key))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match result[..] {
            [] => Ok(None),
            [count, ttl_ms, start_ms] => Ok(Some(Counter {
                key: key.to_string(),
                count: count.max(0) as u64,
                window_start: millis_to_time(start_ms),
                expires_at: now + TimeDelta::milliseconds(ttl_ms.max(0)),
            })),
            _ => Err(StoreError::Corrupt(format!(
                "unexpected script reply: {:?}",
                result
            ))),
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        // Redis evicts expired keys itself.
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
