//! Counter store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Counter, CounterHit};
use crate::error::StoreError;

/// Increment-with-expiry over a storage backend (in-memory, file, Redis).
///
/// Contract shared by every backend:
/// - the first hit for a key opens a window with `count = 1` and
///   `expires_at = now + window`;
/// - hits before `expires_at` bump the count and return the original expiry;
/// - the first hit at or after `expires_at` opens a fresh window;
/// - increments on the same key never lose updates under concurrency.
///
/// Implementations report failures as errors and leave logging to the caller.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key`.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError>;

    /// Read the live counter for `key` without recording a hit.
    async fn peek(&self, key: &str) -> Result<Option<Counter>, StoreError>;

    /// Drop expired counters, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;
}
