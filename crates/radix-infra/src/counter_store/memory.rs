//! In-memory counter store - used for single-instance deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use radix_core::StoreError;
use radix_core::domain::{Counter, CounterHit};
use radix_core::ports::{Clock, CounterStore, SystemClock};

/// In-memory counter store: a HashMap behind one async mutex.
///
/// Every increment takes the same lock, so hits on a key are serialised.
/// Note: Counters are per-process and lost on restart.
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of counters held, expired ones included.
    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;

        let hit = match counters.get_mut(key) {
            Some(counter) => counter.hit(now, window),
            None => {
                let counter = Counter::start(key, now, window);
                let hit = counter.snapshot();
                counters.insert(key.to_string(), counter);
                hit
            }
        };

        Ok(hit)
    }

    async fn peek(&self, key: &str) -> Result<Option<Counter>, StoreError> {
        let now = self.clock.now();
        let counters = self.counters.lock().await;

        Ok(counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;

        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        Ok(before - counters.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta};
    use radix_core::ports::ManualClock;

    fn store_at_epoch() -> (Arc<InMemoryCounterStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        (
            Arc::new(InMemoryCounterStore::with_clock(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn test_increment_within_window() {
        let (store, clock) = store_at_epoch();
        let window = Duration::from_secs(60);

        let first = store.increment("light:a", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.expires_at, clock.now() + TimeDelta::seconds(60));

        clock.advance(TimeDelta::seconds(30));
        let second = store.increment("light:a", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.expires_at, first.expires_at);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (store, clock) = store_at_epoch();
        let window = Duration::from_secs(60);

        store.increment("light:a", window).await.unwrap();
        store.increment("light:a", window).await.unwrap();

        clock.advance(TimeDelta::seconds(60));
        let hit = store.increment("light:a", window).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(hit.expires_at, clock.now() + TimeDelta::seconds(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(InMemoryCounterStore::new());
        let window = Duration::from_secs(60);

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("hard:burst", window).await.unwrap() })
            })
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=200).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_peek_and_purge() {
        let (store, clock) = store_at_epoch();

        store.increment("api:old", Duration::from_secs(10)).await.unwrap();
        store.increment("api:new", Duration::from_secs(120)).await.unwrap();
        assert_eq!(store.peek("api:old").await.unwrap().unwrap().count, 1);
        assert!(store.peek("api:missing").await.unwrap().is_none());

        clock.advance(TimeDelta::seconds(30));
        assert!(store.peek("api:old").await.unwrap().is_none());
        assert_eq!(store.len().await, 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert!(store.peek("api:new").await.unwrap().is_some());
    }
}
