//! Telemetry initialization - tracing subscriber setup.

use std::str::FromStr;

use anyhow::{Context, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,radix_server=debug,radix_infra=debug";
const DEFAULT_SERVICE: &str = "radix-server";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line, for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format '{}' (expected pretty, compact or json)", other),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Stamped as `service` on every access-log line.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            service_name: DEFAULT_SERVICE.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().context("invalid LOG_FORMAT")?,
            None => LogFormat::default(),
        };

        let service_name = lookup("SERVICE_NAME")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        Ok(Self {
            format,
            service_name,
        })
    }
}

/// Initialize the global tracing subscriber.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    tracing::debug!(format = ?config.format, "Telemetry initialized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<TelemetryConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TelemetryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.service_name, "radix-server");
    }

    #[test]
    fn test_format_is_case_insensitive() {
        assert_eq!(load(&[("LOG_FORMAT", "JSON")]).unwrap().format, LogFormat::Json);
        assert_eq!(load(&[("LOG_FORMAT", " compact ")]).unwrap().format, LogFormat::Compact);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = load(&[("LOG_FORMAT", "xml")]).unwrap_err();
        assert!(format!("{:#}", err).contains("LOG_FORMAT"));
    }

    #[test]
    fn test_blank_service_name_falls_back() {
        assert_eq!(load(&[("SERVICE_NAME", "  ")]).unwrap().service_name, "radix-server");
        assert_eq!(load(&[("SERVICE_NAME", "edge-eu")]).unwrap().service_name, "edge-eu");
    }
}
