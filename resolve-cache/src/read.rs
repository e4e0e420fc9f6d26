//! Cache read results carrying provenance metadata.
//!
//! Every successful lookup returns a [`CacheRead`] that records whether the
//! value came from a ready entry, a fresh computation, or an in-flight
//! computation started by another caller.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from a ready entry.
    Hit,
    /// Computed on behalf of this caller.
    Computed,
    /// Joined a computation another caller had already started.
    Coalesced,
}

/// Result of a cache lookup, carrying provenance metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was produced.
    cached_at: DateTime<Utc>,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    /// Create a cache read from a ready entry.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            source: ReadSource::Hit,
        }
    }

    /// Create a cache read from a computation (this caller's or a joined one).
    pub fn from_compute(value: T, source: ReadSource) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            source,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Whether the value was served from a ready entry.
    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Hit
    }

    /// Whether this caller waited on another caller's computation.
    pub fn was_coalesced(&self) -> bool {
        self.source == ReadSource::Coalesced
    }

    /// Time elapsed since the value was produced.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the carried value, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            source: self.source,
        }
    }
}
