//! # Radix Infrastructure
//!
//! Concrete implementations of the ports defined in `radix-core`.
//! This crate contains the counter store backends behind the rate limiter.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies; in-memory and file stores only
//! - `redis` - Redis-backed counter store

pub mod counter_store;

pub use counter_store::{FileCounterStore, InMemoryCounterStore, StoreConfig, StoreKind, connect};

#[cfg(feature = "redis")]
pub use counter_store::{RedisConfig, RedisCounterStore};
