//! Counter store implementations - in-memory, file and Redis - and the factory
//! that picks one by name.

mod file;
mod memory;

pub use file::FileCounterStore;
pub use memory::InMemoryCounterStore;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisCounterStore};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use radix_core::StoreError;
use radix_core::ports::CounterStore;

/// Which backend holds the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    File,
    Redis,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown counter store '{0}' (expected memory, file or redis)")]
pub struct UnknownStoreKind(pub String);

impl FromStr for StoreKind {
    type Err = UnknownStoreKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "array" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            "redis" => Ok(StoreKind::Redis),
            _ => Err(UnknownStoreKind(s.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Memory => "memory",
            StoreKind::File => "file",
            StoreKind::Redis => "redis",
        })
    }
}

/// Everything needed to build any of the backends.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// JSON document used by the file store.
    pub file_path: PathBuf,
    pub redis_url: String,
    pub redis_connect_timeout: Duration,
    /// Use the in-memory store when Redis cannot be reached at startup.
    pub fallback_to_memory: bool,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            file_path: PathBuf::from("storage/ratelimit.json"),
            redis_url: "redis://localhost:6379".to_string(),
            redis_connect_timeout: Duration::from_secs(5),
            fallback_to_memory: true,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Build the configured counter store.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    match config.kind {
        StoreKind::Memory => {
            tracing::info!("Using in-memory counter store (limits are per process)");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        StoreKind::File => Ok(Arc::new(FileCounterStore::open(&config.file_path).await?)),
        StoreKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    let redis_config = RedisConfig {
        url: config.redis_url.clone(),
        connect_timeout: config.redis_connect_timeout,
        fallback_to_memory: config.fallback_to_memory,
        key_prefix: config.key_prefix.clone(),
    };

    match RedisCounterStore::new(redis_config).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if config.fallback_to_memory => {
            tracing::error!(
                error = %e,
                "Redis counter store unavailable. Falling back to in-memory store."
            );
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    if config.fallback_to_memory {
        tracing::error!("Built without redis support. Falling back to in-memory store.");
        return Ok(Arc::new(InMemoryCounterStore::new()));
    }
    Err(StoreError::Unavailable(
        "built without the redis feature".to_string(),
    ))
}
