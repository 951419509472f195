//! Periodic purge of expired counters.

use std::sync::Arc;
use std::time::Duration;

use radix_core::RateLimiter;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Purges expired counters on a fixed interval until shut down.
pub struct Sweeper {
    scheduler: JobScheduler,
}

impl Sweeper {
    /// Register the sweep job and start ticking.
    pub async fn start(
        limiter: Arc<RateLimiter>,
        interval: Duration,
    ) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_repeated_async(interval, move |_id, _scheduler| {
            let limiter = limiter.clone();
            Box::pin(async move { sweep_once(&limiter).await })
        })?;
        let job_id = scheduler.add(job).await?;
        scheduler.start().await?;

        tracing::info!(interval_secs = interval.as_secs(), %job_id, "Counter sweep scheduled");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<(), JobSchedulerError> {
        self.scheduler.shutdown().await
    }
}

/// Run one sweep, logging the outcome.
async fn sweep_once(limiter: &RateLimiter) {
    match limiter.sweep().await {
        Ok(0) => tracing::debug!(store = limiter.store_name(), "No expired counters"),
        Ok(removed) => {
            tracing::info!(store = limiter.store_name(), removed, "Expired counters swept")
        }
        Err(e) => tracing::warn!(store = limiter.store_name(), error = %e, "Counter sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use radix_core::domain::BucketRegistry;
    use radix_core::ports::{CounterStore, ManualClock};
    use radix_infra::InMemoryCounterStore;

    #[tokio::test]
    async fn test_sweep_once_purges_expired_counters() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(store.clone(), BucketRegistry::defaults())
            .with_clock(clock.clone());

        limiter.check("hard", "a").await.unwrap();
        limiter.check("light", "b").await.unwrap();
        assert_eq!(store.len().await, 2);

        clock.advance(TimeDelta::seconds(61));
        sweep_once(&limiter).await;
        assert_eq!(store.len().await, 0);
        assert!(store.peek("hard:a").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweeper_runs_on_its_interval() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let limiter = Arc::new(
            RateLimiter::new(store.clone(), BucketRegistry::defaults()).with_clock(clock.clone()),
        );

        limiter.check("hard", "a").await.unwrap();
        clock.advance(TimeDelta::seconds(61));

        let sweeper = Sweeper::start(limiter, Duration::from_secs(1)).await.unwrap();
        let mut remaining = store.len().await;
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            remaining = store.len().await;
        }
        sweeper.shutdown().await.unwrap();

        assert_eq!(remaining, 0);
    }
}
