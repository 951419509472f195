//! Data Transfer Objects - response types for the API.

use serde::{Deserialize, Serialize};

/// A configured rate limit bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketPolicyResponse {
    pub name: String,
    pub limit: u64,
    pub window_seconds: u64,
}

/// The caller's standing in one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketUsageResponse {
    pub bucket: String,
    pub identifier: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    /// RFC 3339 timestamp; absent when no window is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

/// How the server sees the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub client_ip: String,
    pub subject: String,
}

/// Health check payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub environment: String,
    pub counter_store: String,
}
