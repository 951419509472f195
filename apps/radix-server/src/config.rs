//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use radix_core::domain::{API, BucketPolicy, BucketRegistry, Environment, HARD, LIGHT};
use radix_core::limiter::DEFAULT_STORE_TIMEOUT;
use radix_core::network::{AllowlistRule, parse_rules};
use radix_infra::{StoreConfig, StoreKind};

/// Which bucket guards each route group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBuckets {
    pub web: String,
    pub api: String,
    pub auth: String,
}

impl Default for RouteBuckets {
    fn default() -> Self {
        Self {
            web: LIGHT.to_string(),
            api: API.to_string(),
            auth: HARD.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub trusted_proxies: Vec<AllowlistRule>,
    pub health_allowlist: Vec<AllowlistRule>,
    pub buckets: BucketRegistry,
    pub routes: RouteBuckets,
    pub store: StoreConfig,
    pub store_timeout: Duration,
    /// Interval of the expired-counter sweep; `None` leaves expiry lazy.
    pub sweep_interval: Option<Duration>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let environment = match lookup("APP_ENV") {
            None => Environment::default(),
            Some(name) => name.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unrecognised APP_ENV, assuming production");
                Environment::Production
            }),
        };

        let store_kind = match lookup("RATE_LIMIT_STORE") {
            Some(name) => name.parse::<StoreKind>()?,
            None => StoreKind::default(),
        };
        let store_defaults = StoreConfig::default();
        let store = StoreConfig {
            kind: store_kind,
            file_path: lookup("RATE_LIMIT_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(store_defaults.file_path),
            redis_url: lookup("REDIS_URL").unwrap_or(store_defaults.redis_url),
            redis_connect_timeout: Duration::from_secs(number(
                &lookup,
                "REDIS_CONNECT_TIMEOUT_SECS",
                5,
            )?),
            fallback_to_memory: flag(&lookup, "REDIS_FALLBACK_TO_MEMORY", true)?,
            key_prefix: lookup("RATE_LIMIT_KEY_PREFIX").unwrap_or(store_defaults.key_prefix),
        };

        let buckets = Self::parse_buckets(&lookup)?;

        let route_defaults = RouteBuckets::default();
        let routes = RouteBuckets {
            web: lookup("THROTTLE_WEB_BUCKET").unwrap_or(route_defaults.web),
            api: lookup("THROTTLE_API_BUCKET").unwrap_or(route_defaults.api),
            auth: lookup("THROTTLE_AUTH_BUCKET").unwrap_or(route_defaults.auth),
        };

        let sweep_secs: u64 = number(&lookup, "RATE_LIMIT_SWEEP_SECS", 0)?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: number(&lookup, "PORT", 8080)?,
            environment,
            trusted_proxies: parse_rules(&lookup("TRUSTED_PROXY").unwrap_or_default()),
            health_allowlist: parse_rules(&lookup("HEALTH_ALLOWLIST").unwrap_or_default()),
            buckets,
            routes,
            store,
            store_timeout: Duration::from_millis(number(
                &lookup,
                "RATE_LIMIT_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            )?),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }

    /// Parse bucket policies.
    /// Format: RATE_LIMIT_BUCKETS=light,hard,api,search
    ///         RATE_LIMIT_<NAME>_MAX=<hits>, RATE_LIMIT_<NAME>_WINDOW_SECS=<seconds>
    /// Built-in buckets fall back to their defaults; extra buckets must set a limit.
    fn parse_buckets(lookup: &impl Fn(&str) -> Option<String>) -> anyhow::Result<BucketRegistry> {
        let defaults = BucketRegistry::defaults();
        let names = lookup("RATE_LIMIT_BUCKETS").unwrap_or_else(|| "light,hard,api".to_string());

        let mut registry = BucketRegistry::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let var = name.to_ascii_uppercase().replace('-', "_");
            let fallback = defaults.get(name).ok();

            let limit = match (lookup(&format!("RATE_LIMIT_{}_MAX", var)), fallback) {
                (Some(raw), _) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("RATE_LIMIT_{}_MAX must be a number", var))?,
                (None, Some(policy)) => policy.limit,
                (None, None) => bail!("bucket '{}' has no RATE_LIMIT_{}_MAX", name, var),
            };
            let window_seconds = match lookup(&format!("RATE_LIMIT_{}_WINDOW_SECS", var)) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("RATE_LIMIT_{}_WINDOW_SECS must be a number", var))?,
                None => fallback.map(|p| p.window_seconds).unwrap_or(60),
            };

            registry.insert(BucketPolicy::new(name, limit, window_seconds)?);
        }

        if registry.is_empty() {
            bail!("RATE_LIMIT_BUCKETS names no buckets");
        }
        Ok(registry)
    }
}

/// Parse `key` as a number, or `default` when unset.
fn number<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Parse `key` as a boolean (`true`/`false`, `1`/`0`, `yes`/`no`, any case).
fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> anyhow::Result<bool> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value = raw.trim();
    if ["true", "1", "yes", "on"].iter().any(|t| value.eq_ignore_ascii_case(t)) {
        Ok(true)
    } else if ["false", "0", "no", "off"].iter().any(|f| value.eq_ignore_ascii_case(f)) {
        Ok(false)
    } else {
        bail!("{} must be true or false, got '{}'", key, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.buckets.len(), 3);
        assert_eq!(config.buckets.get(HARD).unwrap().limit, 10);
        assert_eq!(config.routes, RouteBuckets::default());
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.store_timeout, Duration::from_millis(50));
        assert!(config.sweep_interval.is_none());
        assert!(config.trusted_proxies.is_empty());
    }

    #[test]
    fn test_bucket_overrides_and_custom_bucket() {
        let config = load(&[
            ("RATE_LIMIT_BUCKETS", "light,hard,api,search-heavy"),
            ("RATE_LIMIT_HARD_MAX", "5"),
            ("RATE_LIMIT_API_WINDOW_SECS", "3600"),
            ("RATE_LIMIT_SEARCH_HEAVY_MAX", "3"),
        ])
        .unwrap();

        assert_eq!(config.buckets.get(HARD).unwrap().limit, 5);
        assert_eq!(config.buckets.get(API).unwrap().window_seconds, 3600);
        let search = config.buckets.get("search-heavy").unwrap();
        assert_eq!((search.limit, search.window_seconds), (3, 60));
    }

    #[test]
    fn test_custom_bucket_without_limit_is_rejected() {
        assert!(load(&[("RATE_LIMIT_BUCKETS", "light,uploads")]).is_err());
        assert!(load(&[("RATE_LIMIT_LIGHT_WINDOW_SECS", "0")]).is_err());
        assert!(load(&[("RATE_LIMIT_HARD_MAX", "ten")]).is_err());
    }

    #[test]
    fn test_network_and_store_settings() {
        let config = load(&[
            ("APP_ENV", "development"),
            ("TRUSTED_PROXY", "10.0.0.1"),
            ("HEALTH_ALLOWLIST", "192.168.1.0/24, bad-rule, 2001:db8::/32"),
            ("RATE_LIMIT_STORE", "file"),
            ("RATE_LIMIT_FILE_PATH", "/tmp/radix/counters.json"),
            ("RATE_LIMIT_STORE_TIMEOUT_MS", "25"),
            ("RATE_LIMIT_SWEEP_SECS", "300"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.trusted_proxies.len(), 1);
        assert_eq!(config.health_allowlist.len(), 2);
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.store.file_path, PathBuf::from("/tmp/radix/counters.json"));
        assert_eq!(config.store_timeout, Duration::from_millis(25));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_unknown_store_and_environment() {
        assert!(load(&[("RATE_LIMIT_STORE", "memcached")]).is_err());
        let config = load(&[("APP_ENV", "qa")]).unwrap();
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        for key in [
            "PORT",
            "RATE_LIMIT_STORE_TIMEOUT_MS",
            "REDIS_CONNECT_TIMEOUT_SECS",
            "RATE_LIMIT_SWEEP_SECS",
        ] {
            let err = load(&[(key, "5O")]).unwrap_err();
            assert!(format!("{:#}", err).contains(key), "{}", key);
        }
        assert!(load(&[("PORT", "70000")]).is_err());
        assert_eq!(load(&[("PORT", " 9090 ")]).unwrap().port, 9090);
    }

    #[test]
    fn test_flags_ignore_case() {
        let config = load(&[("REDIS_FALLBACK_TO_MEMORY", "FALSE")]).unwrap();
        assert!(!config.store.fallback_to_memory);
        let config = load(&[("REDIS_FALLBACK_TO_MEMORY", "True")]).unwrap();
        assert!(config.store.fallback_to_memory);
        assert!(load(&[("REDIS_FALLBACK_TO_MEMORY", "maybe")]).is_err());
    }
}
