//! Resolution engine configuration.
//!
//! Values can be built in code with the `with_*` builders or loaded from
//! environment variables with [`ResolveConfig::from_env`].

use crate::error::{ConfigError, ResolveResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable for [`ResolveConfig::cache_capacity`].
pub const ENV_CACHE_CAPACITY: &str = "RESOLVE_CACHE_CAPACITY";
/// Environment variable for [`ResolveConfig::default_timeout`], in milliseconds.
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "RESOLVE_DEFAULT_TIMEOUT_MS";
/// Environment variable for [`ResolveConfig::slow_resolution_threshold`], in milliseconds.
pub const ENV_SLOW_THRESHOLD_MS: &str = "RESOLVE_SLOW_THRESHOLD_MS";

/// Configuration for the resolution engine and its cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Maximum number of ready entries kept in the cache before LRU eviction.
    pub cache_capacity: usize,
    /// Deadline applied to callers that do not supply their own.
    pub default_timeout: Option<Duration>,
    /// Resolutions slower than this are logged at warn level.
    pub slow_resolution_threshold: Duration,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            default_timeout: None,
            slow_resolution_threshold: Duration::from_millis(250),
        }
    }
}

impl ResolveConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the default per-caller timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the slow resolution warning threshold.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_resolution_threshold = threshold;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RESOLVE_CACHE_CAPACITY`: Maximum ready entries (default: 1024)
    /// - `RESOLVE_DEFAULT_TIMEOUT_MS`: Default caller deadline (default: none)
    /// - `RESOLVE_SLOW_THRESHOLD_MS`: Slow resolution warning threshold (default: 250)
    pub fn from_env() -> ResolveResult<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_env_with<F>(lookup: F) -> ResolveResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_capacity = match parse_var(&lookup, ENV_CACHE_CAPACITY)? {
            Some(raw) => usize::try_from(raw).map_err(|_| ConfigError::InvalidValue {
                field: ENV_CACHE_CAPACITY.to_string(),
                value: raw.to_string(),
                reason: format!("exceeds the platform maximum of {}", usize::MAX),
            })?,
            None => defaults.cache_capacity,
        };

        let default_timeout =
            parse_var(&lookup, ENV_DEFAULT_TIMEOUT_MS)?.map(Duration::from_millis);

        let slow_resolution_threshold = parse_var(&lookup, ENV_SLOW_THRESHOLD_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.slow_resolution_threshold);

        let config = Self {
            cache_capacity,
            default_timeout,
            slow_resolution_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - cache_capacity > 0
    /// - default_timeout, if set, is non-zero
    pub fn validate(&self) -> ResolveResult<()> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_capacity".to_string(),
                value: self.cache_capacity.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(timeout) = self.default_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "default_timeout".to_string(),
                    value: format!("{:?}", timeout),
                    reason: "must be greater than 0".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
