use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Bucket for cheap, high-volume routes (pages, assets).
pub const LIGHT: &str = "light";
/// Bucket for sensitive routes (login, password reset).
pub const HARD: &str = "hard";
/// Bucket for API clients.
pub const API: &str = "api";

/// A named quota: at most `limit` hits per `window_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPolicy {
    pub name: String,
    pub limit: u64,
    pub window_seconds: u64,
}

impl BucketPolicy {
    /// Build a policy, rejecting empty names and zero-length windows.
    ///
    /// A `limit` of zero is valid and denies every request.
    pub fn new(
        name: impl Into<String>,
        limit: u64,
        window_seconds: u64,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigurationError::InvalidPolicy {
                bucket: name,
                reason: "bucket name is empty".to_string(),
            });
        }
        if name.contains(':') {
            return Err(ConfigurationError::InvalidPolicy {
                bucket: name,
                reason: "bucket name must not contain ':'".to_string(),
            });
        }
        if window_seconds == 0 {
            return Err(ConfigurationError::InvalidPolicy {
                bucket: name,
                reason: "window must be at least one second".to_string(),
            });
        }

        Ok(Self {
            name,
            limit,
            window_seconds,
        })
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// The set of bucket policies known to a limiter, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BucketRegistry {
    policies: BTreeMap<String, BucketPolicy>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three buckets every deployment ships with.
    ///
    /// Numbers are defaults only; deployments override them from config.
    pub fn defaults() -> Self {
        let mut registry = Self::new();
        for (name, limit) in [(LIGHT, 30), (HARD, 10), (API, 120)] {
            registry.insert(BucketPolicy {
                name: name.to_string(),
                limit,
                window_seconds: 60,
            });
        }
        registry
    }

    /// Insert or replace a policy.
    pub fn insert(&mut self, policy: BucketPolicy) {
        self.policies.insert(policy.name.clone(), policy);
    }

    pub fn get(&self, name: &str) -> Result<&BucketPolicy, ConfigurationError> {
        self.policies
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownBucket(name.to_string()))
    }

    /// Policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = &BucketPolicy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
