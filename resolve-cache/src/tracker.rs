//! Dependency tracking for cache invalidation.
//!
//! The tracker keeps two indexes: what each entry was derived from, and which
//! entries were derived from each tag. It owns no values; it only answers
//! "which keys must go if this tag changes?".

use resolve_core::{DependencyTag, RequestKey};
use std::collections::{HashMap, HashSet};

/// Bidirectional tag <-> entry index.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    /// Entries derived from each tag.
    dependents: HashMap<DependencyTag, HashSet<RequestKey>>,
    /// Tags each entry was derived from.
    dependencies: HashMap<RequestKey, HashSet<DependencyTag>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `consumer` was derived from `tag`.
    ///
    /// Returns false if the dependency was already known or names the
    /// consumer itself.
    pub fn record(&mut self, consumer: &RequestKey, tag: DependencyTag) -> bool {
        if matches!(&tag, DependencyTag::Entry(dep) if dep == consumer) {
            return false;
        }
        let inserted = self
            .dependencies
            .entry(consumer.clone())
            .or_default()
            .insert(tag.clone());
        if inserted {
            self.dependents
                .entry(tag)
                .or_default()
                .insert(consumer.clone());
        }
        inserted
    }

    /// Record that `consumer` was derived from the entry `dependency`, and
    /// inherit every tag `dependency` is currently derived from.
    ///
    /// Inheriting keeps invalidation reachable after `dependency` itself has
    /// been evicted and its rows forgotten.
    pub fn record_inherited(&mut self, consumer: &RequestKey, dependency: &RequestKey) -> usize {
        let inherited: Vec<DependencyTag> = self
            .dependencies
            .get(dependency)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default();

        let mut recorded = usize::from(self.record(consumer, DependencyTag::entry(dependency)));
        for tag in inherited {
            recorded += usize::from(self.record(consumer, tag));
        }
        recorded
    }

    /// Tags `key` was derived from.
    pub fn dependencies_of(&self, key: &RequestKey) -> impl Iterator<Item = &DependencyTag> {
        self.dependencies.get(key).into_iter().flatten()
    }

    /// Entries `key` was derived from, including inherited ones.
    pub fn entry_dependencies(&self, key: &RequestKey) -> impl Iterator<Item = &RequestKey> {
        self.dependencies_of(key).filter_map(DependencyTag::as_entry)
    }

    /// Drop every row `key` appears in as a consumer.
    pub fn forget(&mut self, key: &RequestKey) {
        if let Some(tags) = self.dependencies.remove(key) {
            for tag in tags {
                if let Some(keys) = self.dependents.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.dependents.remove(&tag);
                    }
                }
            }
        }
    }

    /// Collect every entry derived from `tag`, directly or through other
    /// collected entries, and drop their rows.
    ///
    /// Each key appears once. The returned keys no longer have tracker rows;
    /// the caller is expected to remove them from its index.
    pub fn collect_invalidation(&mut self, tag: &DependencyTag) -> Vec<RequestKey> {
        let mut worklist = vec![tag.clone()];
        let mut seen = HashSet::new();
        let mut collected = Vec::new();

        while let Some(tag) = worklist.pop() {
            let Some(keys) = self.dependents.remove(&tag) else {
                continue;
            };
            for key in keys {
                if seen.insert(key.clone()) {
                    worklist.push(DependencyTag::entry(&key));
                    collected.push(key);
                }
            }
        }

        for key in &collected {
            self.forget(key);
        }
        collected
    }

    /// Number of distinct tags with at least one dependent.
    pub fn tag_count(&self) -> usize {
        self.dependents.len()
    }

    /// Number of entries with at least one recorded dependency.
    pub fn tracked_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dependents.is_empty()
    }

    pub fn clear(&mut self) {
        self.dependents.clear();
        self.dependencies.clear();
    }
}
