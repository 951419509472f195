//! Rate limiter - composes a counter store with the fixed-window policy.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{BucketPolicy, BucketRegistry, Counter, Decision, RateLimitKey};
use crate::error::{ConfigurationError, LimiterError, StoreError};
use crate::policy;
use crate::ports::{Clock, CounterStore, SystemClock};

/// Default upper bound on a single store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Fixed-window rate limiter over a pluggable [`CounterStore`].
///
/// Store failures and timeouts fail open: the request is allowed and the
/// failure is logged once. An unreachable backend degrades limiting instead
/// of taking the whole site down with it.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    buckets: BucketRegistry,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, buckets: BucketRegistry) -> Self {
        Self {
            store,
            buckets,
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Look up a bucket policy. Used to validate route wiring at startup.
    pub fn policy(&self, bucket: &str) -> Result<&BucketPolicy, ConfigurationError> {
        self.buckets.get(bucket)
    }

    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Count one hit for `identifier` in `bucket` and decide whether it may proceed.
    ///
    /// The hit stays counted even if the caller later abandons the request.
    pub async fn check(&self, bucket: &str, identifier: &str) -> Result<Decision, ConfigurationError> {
        let policy = self.buckets.get(bucket)?;
        let key = RateLimitKey::new(bucket, identifier);

        let hit = match tokio::time::timeout(
            self.store_timeout,
            self.store.increment(key.as_str(), policy.window()),
        )
        .await
        {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => return Ok(self.fail_open(policy, &key, e)),
            Err(_) => {
                return Ok(self.fail_open(policy, &key, StoreError::Timeout(self.store_timeout)));
            }
        };

        let retry_after =
            policy::retry_after_seconds(hit.expires_at, self.clock.now(), policy.window_seconds);
        let decision = policy::evaluate(hit.count, policy.limit).with_retry_after(retry_after);

        tracing::trace!(
            key = %key,
            count = hit.count,
            limit = policy.limit,
            allowed = decision.allowed,
            "Rate limit checked"
        );

        Ok(decision)
    }

    /// Current counter for `identifier` in `bucket`, without counting a hit.
    ///
    /// A counter whose window has elapsed reads as `None`.
    pub async fn usage(
        &self,
        bucket: &str,
        identifier: &str,
    ) -> Result<Option<Counter>, LimiterError> {
        self.buckets.get(bucket)?;
        let key = RateLimitKey::new(bucket, identifier);

        match tokio::time::timeout(self.store_timeout, self.store.peek(key.as_str())).await {
            Ok(result) => {
                let now = self.clock.now();
                Ok(result?.filter(|counter| !counter.is_expired(now)))
            }
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        }
    }

    /// Remove expired counters from the store.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        self.store.purge_expired().await
    }

    fn fail_open(&self, policy: &BucketPolicy, key: &RateLimitKey, error: StoreError) -> Decision {
        tracing::warn!(
            key = %key,
            store = self.store.name(),
            error = %error,
            "Counter store failed, allowing request"
        );
        Decision::fail_open(policy.limit)
    }
}
