//! Error types for resolve operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for query resolution.
///
/// Every variant is `Clone` so that a single outcome can be handed to all
/// callers coalesced onto the same computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid parameter {index} for query kind {kind}: {reason}")]
    InvalidParameter {
        kind: String,
        index: usize,
        reason: String,
    },

    #[error("Unknown query kind: {kind}")]
    UnknownKind { kind: String },

    #[error("Query kind already registered: {kind}")]
    DuplicateKind { kind: String },

    #[error("Resolution of {kind} failed: {reason}")]
    ResolutionFailed { kind: String, reason: String },

    #[error("Deadline exceeded while resolving {kind}")]
    DeadlineExceeded { kind: String },

    #[error("Resolution of {kind} was cancelled")]
    Cancelled { kind: String },

    #[error("Dependency cycle detected at {key}")]
    DependencyCycle { key: String },

    #[error("Dataset {dataset} has no version after sequence {sequence}")]
    VersionExhausted { dataset: String, sequence: u64 },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize tracing: {reason}")]
    TelemetryInit { reason: String },
}

impl ResolveError {
    /// Build a `ResolutionFailed` error for the given query kind.
    pub fn resolution_failed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Whether issuing the same request again may succeed.
    ///
    /// Malformed requests and registry mismatches are permanent; resolver
    /// failures and per-caller abandonment are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFailed { .. } | Self::DeadlineExceeded { .. } | Self::Cancelled { .. }
        )
    }

    /// The query kind this error refers to, if any.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::InvalidParameter { kind, .. }
            | Self::UnknownKind { kind }
            | Self::DuplicateKind { kind }
            | Self::ResolutionFailed { kind, .. }
            | Self::DeadlineExceeded { kind }
            | Self::Cancelled { kind } => Some(kind),
            Self::DependencyCycle { .. }
            | Self::VersionExhausted { .. }
            | Self::LockPoisoned
            | Self::Config(_)
            | Self::TelemetryInit { .. } => None,
        }
    }
}

/// Result type alias for resolve operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

// =============================================================================
// TESTS
// =============================================================================
