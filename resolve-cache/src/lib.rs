//! Resolve Cache - Coalescing Memoization Layer
//!
//! Memoizes query results per [`resolve_core::RequestKey`], guarantees at
//! most one in-flight computation per key, and invalidates entries through
//! recorded dependency tags.

pub mod memo;
pub mod read;
pub mod stats;
pub mod tracker;

pub use memo::{Computed, EntryId, EntryState, MemoCache};
pub use read::{CacheRead, ReadSource};
pub use stats::CacheStats;
pub use tracker::DependencyTracker;
