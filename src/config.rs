//! Runtime configuration read from the environment.

use crate::policy::{InvalidPolicy, QuotaPolicy};
use ::config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Settings for the server and the global limiter profile.
///
/// Every field maps to the upper case environment variable of the same name, e.g.
/// `RATE_LIMIT_MAX`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared store location, the in-memory store is used when absent.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix applied to every key written to the shared store.
    #[serde(default)]
    pub redis_key_prefix: Option<String>,

    /// `tracing_subscriber` filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Global window in milliseconds, truncated to whole seconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    /// Global requests per window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u64,

    #[serde(default = "default_rate_limit_block_seconds")]
    pub rate_limit_block_seconds: u64,

    /// Zero disables the in-memory garbage collector.
    #[serde(default = "default_rate_limit_gc_interval_seconds")]
    pub rate_limit_gc_interval_seconds: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    9000
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_rate_limit_window_ms() -> u64 {
    15 * 60 * 1000
}

fn default_rate_limit_max() -> u64 {
    100
}

fn default_rate_limit_block_seconds() -> u64 {
    60
}

fn default_rate_limit_gc_interval_seconds() -> u64 {
    crate::backend::memory::DEFAULT_GC_INTERVAL_SECONDS
}

impl Settings {
    /// Load a `.env` file if there is one, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Foreign(Box::new(e)));
            }
        }
        Self::from_environment(Environment::default())
    }

    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// The quota of the global profile.
    pub fn global_policy(&self) -> Result<QuotaPolicy, InvalidPolicy> {
        QuotaPolicy::new(
            self.rate_limit_max,
            self.rate_limit_window_ms / 1000,
            self.rate_limit_block_seconds,
        )
    }

    pub fn gc_interval(&self) -> Option<Duration> {
        match self.rate_limit_gc_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::Map;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let source: Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_environment(Environment::default().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.redis_url, None);
        assert_eq!(
            settings.global_policy().unwrap(),
            QuotaPolicy::new(100, 900, 60).unwrap()
        );
        assert_eq!(settings.gc_interval(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("PORT", "10000"),
            ("REDIS_URL", "redis://cache:6379"),
            ("RATE_LIMIT_WINDOW_MS", "60500"),
            ("RATE_LIMIT_MAX", "20"),
            ("RATE_LIMIT_GC_INTERVAL_SECONDS", "0"),
        ])
        .unwrap();
        assert_eq!(settings.port, 10000);
        assert_eq!(settings.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(
            settings.global_policy().unwrap(),
            QuotaPolicy::new(20, 60, 60).unwrap()
        );
        assert_eq!(settings.gc_interval(), None);
    }

    #[test]
    fn test_sub_second_window_is_invalid() {
        let settings = settings(&[("RATE_LIMIT_WINDOW_MS", "500")]).unwrap();
        assert_eq!(settings.global_policy(), Err(InvalidPolicy::ZeroDuration));
    }

    #[test]
    fn test_oversized_block_is_invalid() {
        let settings = settings(&[("RATE_LIMIT_BLOCK_SECONDS", "10000000000000")]).unwrap();
        assert_eq!(settings.global_policy(), Err(InvalidPolicy::DurationTooLarge));
    }

    #[test]
    fn test_malformed_number() {
        assert!(settings(&[("RATE_LIMIT_MAX", "lots")]).is_err());
    }
}
