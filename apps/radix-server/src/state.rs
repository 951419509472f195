//! Application state - shared across all handlers.

use std::sync::Arc;

use radix_core::RateLimiter;
use radix_core::domain::Environment;
use radix_core::network::ClientIpResolver;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub resolver: Arc<ClientIpResolver>,
    pub environment: Environment,
}

impl AppState {
    pub fn new(
        limiter: Arc<RateLimiter>,
        resolver: Arc<ClientIpResolver>,
        environment: Environment,
    ) -> Self {
        Self {
            limiter,
            resolver,
            environment,
        }
    }
}
