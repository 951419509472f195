//! # Radix Core
//!
//! The request-guard layer of the Radix framework: fixed-window rate limiting,
//! client IP resolution and CIDR allowlists.
//! This crate holds domain types, ports and pure logic with zero infrastructure
//! dependencies; counter store backends live in `radix-infra`.

pub mod domain;
pub mod error;
pub mod limiter;
pub mod network;
pub mod policy;
pub mod ports;

pub use error::{ConfigurationError, LimiterError, StoreError};
pub use limiter::RateLimiter;
