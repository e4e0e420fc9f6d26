//! Cache usage statistics.

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups answered by a ready entry.
    pub hits: u64,
    /// Number of lookups that started a new computation.
    pub misses: u64,
    /// Number of lookups that joined an in-flight computation.
    pub coalesced: u64,
    /// Number of computations that returned an error.
    pub failures: u64,
    /// Number of ready entries removed due to capacity.
    pub evictions: u64,
    /// Number of entries removed by tag invalidation (including cascades).
    pub invalidations: u64,
    /// Number of ready entries currently cached.
    pub entry_count: u64,
    /// Number of computations currently in flight.
    pub pending_count: u64,
    /// Distinct dependency tags with at least one dependent entry.
    pub tracked_tags: u64,
    /// Entries with at least one recorded dependency.
    pub tracked_entries: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    ///
    /// Coalesced lookups count as hits since they did not trigger a
    /// computation of their own.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Total number of lookups.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.coalesced
    }
}
