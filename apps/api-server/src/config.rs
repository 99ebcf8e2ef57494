//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use bulwark_core::domain::RateLimitConfigPatch;
use bulwark_core::services::{ConfigProviderSettings, CoordinatorSettings};
use bulwark_infra::DatabaseConfig;

#[cfg(feature = "redis")]
use bulwark_infra::RedisCounterStoreConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<DatabaseConfig>,
    #[cfg(feature = "redis")]
    pub redis: Option<RedisCounterStoreConfig>,
    pub limiter: LimiterConfig,
}

/// Rate limiter tuning.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub retry_interval: Duration,
    pub store_timeout: Duration,
    pub config_cache_ttl: Duration,
    pub warning_dedup_window: Duration,
    pub overrides: HashMap<String, RateLimitConfigPatch>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            store_timeout: Duration::from_millis(500),
            config_cache_ttl: Duration::from_millis(5_000),
            warning_dedup_window: Duration::from_secs(60),
            overrides: HashMap::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

impl LimiterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_interval: parse_var("RATE_LIMIT_RETRY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
            store_timeout: parse_var("RATE_LIMIT_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            config_cache_ttl: parse_var("RATE_LIMIT_CONFIG_CACHE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.config_cache_ttl),
            warning_dedup_window: parse_var("RATE_LIMIT_WARNING_DEDUP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.warning_dedup_window),
            overrides: env::var("RATE_LIMIT_OVERRIDES")
                .map(|raw| parse_overrides(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            retry_interval: self.retry_interval,
            store_timeout: self.store_timeout,
        }
    }

    pub fn config_provider_settings(&self) -> ConfigProviderSettings {
        ConfigProviderSettings {
            cache_ttl: self.config_cache_ttl,
            overrides: self.overrides.clone(),
        }
    }
}

/// Parse `RATE_LIMIT_OVERRIDES`, a JSON object of `{module: partial policy}`.
/// Malformed input and invalid entries are logged and skipped.
fn parse_overrides(raw: &str) -> HashMap<String, RateLimitConfigPatch> {
    let parsed: HashMap<String, RateLimitConfigPatch> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed RATE_LIMIT_OVERRIDES");
            return HashMap::new();
        }
    };

    parsed
        .into_iter()
        .filter(|(module, patch)| match patch.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "Ignoring invalid rate limit override");
                false
            }
        })
        .collect()
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT").unwrap_or(8080),
            database: DatabaseConfig::from_env(),
            #[cfg(feature = "redis")]
            redis: env::var("REDIS_URL")
                .ok()
                .map(|_| RedisCounterStoreConfig::from_env()),
            limiter: LimiterConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::domain::EnforcementMode;

    #[test]
    fn test_overrides_parse_partial_policies() {
        let overrides = parse_overrides(r#"{"auth": {"mode": "monitor", "maxRequests": 10}}"#);
        let auth = &overrides["auth"];
        assert_eq!(auth.mode, Some(EnforcementMode::Monitor));
        assert_eq!(auth.max_requests, Some(10));
        assert_eq!(auth.window_ms, None);
    }

    #[test]
    fn test_invalid_overrides_are_dropped() {
        assert!(parse_overrides("not json").is_empty());

        let overrides = parse_overrides(r#"{"auth": {"windowMs": 0}, "export": {"isActive": false}}"#);
        assert!(!overrides.contains_key("auth"));
        assert!(overrides.contains_key("export"));
    }
}
