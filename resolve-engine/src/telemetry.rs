//! Tracing subscriber setup.
//!
//! Libraries only emit `tracing` events; binaries and test harnesses that
//! embed the engine call [`init_tracing`] once at startup to print them.

use resolve_core::{ConfigError, ResolveError, ResolveResult};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive variable, e.g. `resolve_engine=debug,info`.
pub const ENV_LOG_FILTER: &str = "RESOLVE_LOG";

/// Output format variable: `plain` or `json`.
pub const ENV_LOG_FORMAT: &str = "RESOLVE_LOG_FORMAT";

const DEFAULT_FILTER: &str = "resolve_engine=info,resolve_cache=info,warn";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                field: ENV_LOG_FORMAT.to_string(),
                value: other.to_string(),
                reason: "expected plain or json".to_string(),
            }),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl TelemetryConfig {
    /// Read `RESOLVE_LOG` and `RESOLVE_LOG_FORMAT`, defaulting when unset.
    pub fn from_env() -> ResolveResult<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injected variable source.
    pub fn from_env_with<F>(lookup: F) -> ResolveResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            EnvFilter::try_new(&filter).map_err(|e| ConfigError::InvalidValue {
                field: ENV_LOG_FILTER.to_string(),
                value: filter.clone(),
                reason: e.to_string(),
            })?;
            config.filter = filter;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.format = format.parse()?;
        }
        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the filter is malformed or a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> ResolveResult<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: ENV_LOG_FILTER.to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    installed.map_err(|e| ResolveError::TelemetryInit {
        reason: e.to_string(),
    })?;

    tracing::info!(filter = %config.filter, format = ?config.format, "tracing initialized");
    Ok(())
}
