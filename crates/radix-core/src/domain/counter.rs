use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite `bucket:identifier` key under which hits are counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(bucket: &str, identifier: &str) -> Self {
        Self(format!("{}:{}", bucket, identifier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hits recorded for one key within one fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub key: String,
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What an increment reports back to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    pub count: u64,
    pub expires_at: DateTime<Utc>,
}

impl Counter {
    /// Open a new window holding a single hit.
    pub fn start(key: impl Into<String>, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            key: key.into(),
            count: 1,
            window_start: now,
            expires_at: expiry(now, window),
        }
    }

    /// The window is `[window_start, expires_at)`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Record one hit: bump the count inside the window, or reopen it once expired.
    ///
    /// The expiry never moves while the window is open.
    pub fn hit(&mut self, now: DateTime<Utc>, window: Duration) -> CounterHit {
        if self.is_expired(now) {
            *self = Self::start(std::mem::take(&mut self.key), now, window);
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> CounterHit {
        CounterHit {
            count: self.count,
            expires_at: self.expires_at,
        }
    }
}

/// `now + window`, saturating at the far end of the calendar.
pub fn expiry(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_key_format() {
        assert_eq!(RateLimitKey::new("hard", "10.0.0.7").as_str(), "hard:10.0.0.7");
    }

    #[test]
    fn test_hits_keep_original_expiry() {
        let window = Duration::from_secs(60);
        let mut counter = Counter::start("k", at(0), window);

        let hit = counter.hit(at(30), window);
        assert_eq!(hit.count, 2);
        assert_eq!(hit.expires_at, at(60));

        let hit = counter.hit(at(59), window);
        assert_eq!(hit.count, 3);
        assert_eq!(hit.expires_at, at(60));
    }

    #[test]
    fn test_hit_after_expiry_reopens_window() {
        let window = Duration::from_secs(60);
        let mut counter = Counter::start("k", at(0), window);
        counter.hit(at(10), window);

        let hit = counter.hit(at(60), window);
        assert_eq!(hit.count, 1);
        assert_eq!(hit.expires_at, at(120));
        assert_eq!(counter.window_start, at(60));
        assert_eq!(counter.key, "k");
    }
}
