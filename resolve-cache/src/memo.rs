//! Coalescing memoization cache.
//!
//! [`MemoCache::get_or_compute`] guarantees at most one in-flight computation
//! per [`RequestKey`]. The first caller for a key inserts a pending entry and
//! starts the computation on a detached task; later callers for the same key
//! wait on that entry and receive the same outcome. Successful results
//! become ready entries; failures are delivered to every waiter and then
//! forgotten, so the next request retries from scratch.
//!
//! # Entry lifecycle
//!
//! ```text
//! (absent) --miss--> Pending --ok--> Ready --evict/invalidate--> (absent)
//!                       |
//!                       +--err / invalidate--> (absent)
//! ```
//!
//! Ready entries are bounded by capacity with least-recently-used eviction.
//! Using an entry also refreshes every entry it was derived from, so a
//! dependency is never evicted ahead of its consumers. An entry whose
//! dependency chain alone exceeds the capacity is kept together with that
//! chain until the next insertion. Evicting or invalidating an entry also
//! invalidates every entry that recorded it as a dependency.

use crate::read::{CacheRead, ReadSource};
use crate::stats::CacheStats;
use crate::tracker::DependencyTracker;
use chrono::{DateTime, Utc};
use lru::LruCache;
use resolve_core::{DependencyTag, RequestKey, ResolveError, ResolveResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// A computed value together with the tags it was derived from.
#[derive(Debug, Clone)]
pub struct Computed<V> {
    pub value: V,
    pub dependencies: Vec<DependencyTag>,
}

impl<V> Computed<V> {
    /// A value with no declared dependencies.
    pub fn new(value: V) -> Self {
        Self {
            value,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(value: V, dependencies: Vec<DependencyTag>) -> Self {
        Self {
            value,
            dependencies,
        }
    }
}

/// Identity of one computation of a key.
///
/// A key that is invalidated and requested again gets a new id, so a
/// computation that outlived its entry cannot write into its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable state of an indexed entry.
///
/// Invalidated and evicted entries are removed from the index and therefore
/// have no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
}

/// Outcome slot shared between a computation and its waiters.
type Outcome<V> = Option<ResolveResult<V>>;

enum Slot<V> {
    Pending {
        entry_id: EntryId,
        outcome: watch::Receiver<Outcome<V>>,
    },
    Ready {
        entry_id: EntryId,
        value: V,
        cached_at: DateTime<Utc>,
    },
}

impl<V> Slot<V> {
    fn entry_id(&self) -> EntryId {
        match self {
            Self::Pending { entry_id, .. } | Self::Ready { entry_id, .. } => *entry_id,
        }
    }

    fn state(&self) -> EntryState {
        match self {
            Self::Pending { .. } => EntryState::Pending,
            Self::Ready { .. } => EntryState::Ready,
        }
    }
}

/// Everything guarded by the cache mutex.
struct CacheState<V> {
    slots: HashMap<RequestKey, Slot<V>>,
    /// Ready entries in recency order. Unbounded: capacity is enforced by
    /// `evict_to` so evictions can cascade.
    recency: LruCache<RequestKey, ()>,
    tracker: DependencyTracker,
    next_entry_id: u64,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            recency: LruCache::unbounded(),
            tracker: DependencyTracker::new(),
            next_entry_id: 0,
            stats: CacheStats::default(),
        }
    }

    fn allocate_entry_id(&mut self) -> EntryId {
        self.next_entry_id += 1;
        EntryId(self.next_entry_id)
    }

    /// Whether `key` is still the pending entry created with `entry_id`.
    fn is_current_pending(&self, key: &RequestKey, entry_id: EntryId) -> bool {
        matches!(
            self.slots.get(key),
            Some(slot @ Slot::Pending { .. }) if slot.entry_id() == entry_id
        )
    }

    fn record(&mut self, key: &RequestKey, tag: DependencyTag) -> bool {
        match tag {
            DependencyTag::Entry(dependency) => {
                self.tracker.record_inherited(key, &dependency) > 0
            }
            tag => self.tracker.record(key, tag),
        }
    }

    /// `key` followed by every entry it was derived from, each consumer
    /// listed before its own dependencies.
    fn consumer_first_closure(&self, key: &RequestKey) -> Vec<RequestKey> {
        let mut visited = HashSet::new();
        let mut finished = Vec::new();
        let mut stack = vec![(key.clone(), false)];

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                finished.push(current);
                continue;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            stack.push((current.clone(), true));
            for dependency in self.tracker.entry_dependencies(&current) {
                if !visited.contains(dependency) {
                    stack.push((dependency.clone(), false));
                }
            }
        }

        finished.reverse();
        finished
    }

    /// Mark `key` and its ready dependencies most recently used, keeping every
    /// dependency more recent than its consumers. Returns how many ready
    /// entries were promoted.
    fn promote_with_dependencies(&mut self, key: &RequestKey) -> usize {
        let mut promoted = 0;
        for entry in self.consumer_first_closure(key) {
            if self.recency.contains(&entry) {
                self.recency.promote(&entry);
                promoted += 1;
            }
        }
        promoted
    }

    /// Store a ready value. Returns the number of ready entries that must
    /// survive the following eviction pass.
    fn insert_ready(&mut self, key: RequestKey, entry_id: EntryId, value: V) -> usize {
        self.recency.push(key.clone(), ());
        self.slots.insert(
            key.clone(),
            Slot::Ready {
                entry_id,
                value,
                cached_at: Utc::now(),
            },
        );
        self.promote_with_dependencies(&key)
    }

    /// Remove an entry and its tracker rows. Does not cascade.
    fn remove_entry(&mut self, key: &RequestKey) -> Option<Slot<V>> {
        let slot = self.slots.remove(key)?;
        self.recency.pop(key);
        self.tracker.forget(key);
        Some(slot)
    }

    /// Remove every entry derived from `tag`, transitively.
    fn invalidate_tag(&mut self, tag: &DependencyTag) -> usize {
        let keys = self.tracker.collect_invalidation(tag);
        let mut removed = 0;
        for key in keys {
            if let Some(slot) = self.remove_entry(&key) {
                trace!(key = %key, state = ?slot.state(), "entry invalidated");
                removed += 1;
            }
        }
        self.stats.invalidations += removed as u64;
        removed
    }

    /// Evict least-recently-used ready entries until at most `limit` remain.
    ///
    /// Dependencies are always more recent than their consumers, so the
    /// cascade only reaches pending consumers or entries older than the
    /// victim.
    fn evict_to(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.recency.len() > limit {
            let Some((key, ())) = self.recency.pop_lru() else {
                break;
            };
            self.remove_entry(&key);
            self.stats.evictions += 1;
            evicted += 1;

            let cascaded = self.invalidate_tag(&DependencyTag::entry(&key));
            debug!(key = %key, cascaded, "evicted least recently used entry");
        }
        evicted
    }

    fn snapshot_stats(&self) -> CacheStats {
        let ready = self.recency.len() as u64;
        CacheStats {
            entry_count: ready,
            pending_count: self.slots.len() as u64 - ready,
            tracked_tags: self.tracker.tag_count() as u64,
            tracked_entries: self.tracker.tracked_count() as u64,
            ..self.stats.clone()
        }
    }
}

impl<V: Clone> CacheState<V> {
    /// Return a ready value and mark it, with its dependencies, most
    /// recently used.
    fn touch(&mut self, key: &RequestKey) -> Option<(V, DateTime<Utc>)> {
        let (value, cached_at) = match self.slots.get(key) {
            Some(Slot::Ready {
                value, cached_at, ..
            }) => (value.clone(), *cached_at),
            _ => return None,
        };
        self.promote_with_dependencies(key);
        Some((value, cached_at))
    }
}

/// Removes a pending entry if its computation ends without reporting back
/// (panic, or the task is dropped by a shutting-down runtime).
struct PendingGuard<V> {
    state: Arc<Mutex<CacheState<V>>>,
    key: RequestKey,
    entry_id: EntryId,
    armed: bool,
}

impl<V> PendingGuard<V> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<V> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            if state.is_current_pending(&self.key, self.entry_id) {
                state.remove_entry(&self.key);
                state.stats.failures += 1;
                warn!(key = %self.key, "computation ended without a result, entry removed");
            }
        }
    }
}

/// Coalescing, bounded, dependency-tracked memoization cache.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct MemoCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    capacity: usize,
}

impl<V> Clone for MemoCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            capacity: self.capacity,
        }
    }
}

impl<V> MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` ready entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> ResolveResult<MutexGuard<'_, CacheState<V>>> {
        self.state.lock().map_err(|_| ResolveError::LockPoisoned)
    }

    /// Return the value for `key`, computing it at most once.
    ///
    /// - Ready entry: returned immediately, no computation.
    /// - Pending entry: waits for the in-flight computation and returns its
    ///   outcome.
    /// - No entry: inserts a pending entry and runs `compute` on a detached
    ///   tokio task, passing it the new entry's [`EntryId`].
    ///
    /// Dropping the returned future stops this caller's wait only; the
    /// computation keeps running for other waiters and still populates the
    /// cache. Must be called from within a tokio runtime.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: RequestKey,
        compute: F,
    ) -> ResolveResult<CacheRead<V>>
    where
        F: FnOnce(EntryId) -> Fut + Send + 'static,
        Fut: Future<Output = ResolveResult<Computed<V>>> + Send + 'static,
    {
        let (mut outcome, source) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;

            if let Some((value, cached_at)) = state.touch(&key) {
                state.stats.hits += 1;
                trace!(key = %key, "cache hit");
                return Ok(CacheRead::from_cache(value, cached_at));
            }

            let in_flight = match state.slots.get(&key) {
                Some(Slot::Pending { outcome, .. }) => Some(outcome.clone()),
                _ => None,
            };

            match in_flight {
                Some(outcome) => {
                    state.stats.coalesced += 1;
                    debug!(key = %key, "joining in-flight computation");
                    (outcome, ReadSource::Coalesced)
                }
                None => {
                    state.stats.misses += 1;
                    let entry_id = state.allocate_entry_id();
                    let (tx, rx) = watch::channel(None);
                    state.slots.insert(
                        key.clone(),
                        Slot::Pending {
                            entry_id,
                            outcome: rx.clone(),
                        },
                    );
                    debug!(key = %key, entry_id = %entry_id, "cache miss, starting computation");
                    self.spawn_computation(key.clone(), entry_id, tx, compute);
                    (rx, ReadSource::Computed)
                }
            }
        };

        let value = wait_for_outcome(&mut outcome, &key).await?;
        Ok(CacheRead::from_compute(value, source))
    }

    fn spawn_computation<F, Fut>(
        &self,
        key: RequestKey,
        entry_id: EntryId,
        tx: watch::Sender<Outcome<V>>,
        compute: F,
    ) where
        F: FnOnce(EntryId) -> Fut + Send + 'static,
        Fut: Future<Output = ResolveResult<Computed<V>>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;
        // Built outside the task so an unpolled, dropped task still cleans up.
        let guard = PendingGuard {
            state: Arc::clone(&state),
            key: key.clone(),
            entry_id,
            armed: true,
        };

        tokio::spawn(async move {
            let mut guard = guard;
            let result = compute(entry_id).await;
            guard.disarm();
            let outcome = finish(&state, &key, entry_id, result, capacity);
            tx.send_replace(Some(outcome));
        });
    }

    /// Return a ready value without computing anything.
    pub fn get(&self, key: &RequestKey) -> ResolveResult<Option<CacheRead<V>>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        match state.touch(key) {
            Some((value, cached_at)) => {
                state.stats.hits += 1;
                Ok(Some(CacheRead::from_cache(value, cached_at)))
            }
            None => Ok(None),
        }
    }

    /// State of the entry for `key`, if indexed.
    pub fn entry_state(&self, key: &RequestKey) -> ResolveResult<Option<EntryState>> {
        Ok(self.lock()?.slots.get(key).map(Slot::state))
    }

    /// Id of the computation currently indexed under `key`.
    pub fn entry_id(&self, key: &RequestKey) -> ResolveResult<Option<EntryId>> {
        Ok(self.lock()?.slots.get(key).map(Slot::entry_id))
    }

    /// Whether a ready entry exists for `key`.
    pub fn contains(&self, key: &RequestKey) -> ResolveResult<bool> {
        Ok(self.entry_state(key)? == Some(EntryState::Ready))
    }

    /// Number of ready entries.
    pub fn len(&self) -> ResolveResult<usize> {
        Ok(self.lock()?.recency.len())
    }

    pub fn is_empty(&self) -> ResolveResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Record that computation `entry_id` of `key` was derived from `tag`.
    ///
    /// Returns false when `key` is no longer indexed under `entry_id`, for
    /// example after it was invalidated and restarted by another caller.
    /// `Entry` tags also inherit the dependency's own tags.
    pub fn record_dependency(
        &self,
        key: &RequestKey,
        entry_id: EntryId,
        tag: DependencyTag,
    ) -> ResolveResult<bool> {
        let mut state = self.lock()?;
        match state.slots.get(key) {
            Some(slot) if slot.entry_id() == entry_id => Ok(state.record(key, tag)),
            _ => {
                trace!(
                    key = %key,
                    entry_id = %entry_id,
                    tag = %tag,
                    "dependency of a stale computation dropped"
                );
                Ok(false)
            }
        }
    }

    /// Tags the entry for `key` was derived from.
    pub fn dependencies_of(&self, key: &RequestKey) -> ResolveResult<Vec<DependencyTag>> {
        Ok(self
            .lock()?
            .tracker
            .dependencies_of(key)
            .cloned()
            .collect())
    }

    /// Remove every entry derived from `tag`, directly or transitively.
    ///
    /// Pending entries are removed from the index too: their computation
    /// still answers its current waiters but the result is not stored.
    pub fn invalidate(&self, tag: &DependencyTag) -> ResolveResult<usize> {
        let removed = self.lock()?.invalidate_tag(tag);
        if removed > 0 {
            info!(tag = %tag, removed, "invalidated cache entries");
        }
        Ok(removed)
    }

    /// Remove the entry for `key` and everything derived from it.
    pub fn invalidate_key(&self, key: &RequestKey) -> ResolveResult<usize> {
        let mut state = self.lock()?;
        let mut removed = 0;
        if state.remove_entry(key).is_some() {
            state.stats.invalidations += 1;
            removed += 1;
        }
        removed += state.invalidate_tag(&DependencyTag::entry(key));
        Ok(removed)
    }

    /// Remove every entry. Returns the number of entries removed.
    pub fn clear(&self) -> ResolveResult<usize> {
        let mut state = self.lock()?;
        let removed = state.slots.len();
        state.slots.clear();
        state.recency.clear();
        state.tracker.clear();
        state.stats.invalidations += removed as u64;
        Ok(removed)
    }

    pub fn stats(&self) -> ResolveResult<CacheStats> {
        Ok(self.lock()?.snapshot_stats())
    }
}

/// Store or discard a finished computation and produce the outcome for waiters.
fn finish<V: Clone>(
    state: &Mutex<CacheState<V>>,
    key: &RequestKey,
    entry_id: EntryId,
    result: ResolveResult<Computed<V>>,
    capacity: usize,
) -> ResolveResult<V> {
    let mut guard = state.lock().map_err(|_| ResolveError::LockPoisoned)?;
    let state = &mut *guard;
    let current = state.is_current_pending(key, entry_id);

    match result {
        Ok(Computed {
            value,
            dependencies,
        }) => {
            if current {
                for tag in dependencies {
                    state.record(key, tag);
                }
                let in_use = state.insert_ready(key.clone(), entry_id, value.clone());
                if in_use > capacity {
                    debug!(key = %key, in_use, capacity, "dependency chain exceeds capacity");
                }
                let evicted = state.evict_to(capacity.max(in_use));
                trace!(key = %key, evicted, "entry ready");
            } else {
                debug!(key = %key, "entry invalidated while computing, result not stored");
            }
            Ok(value)
        }
        Err(err) => {
            state.stats.failures += 1;
            if current {
                state.remove_entry(key);
            }
            warn!(key = %key, error = %err, "computation failed");
            Err(err)
        }
    }
}

async fn wait_for_outcome<V: Clone>(
    outcome: &mut watch::Receiver<Outcome<V>>,
    key: &RequestKey,
) -> ResolveResult<V> {
    let abandoned = || {
        ResolveError::resolution_failed(
            key.kind().as_str(),
            "computation ended without producing a result",
        )
    };

    let finished = {
        let current = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| abandoned())?;
        (*current).clone()
    };
    finished.unwrap_or_else(|| Err(abandoned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_core::{DatasetVersion, Param, ParamSchema, ParamType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    fn version() -> DatasetVersion {
        DatasetVersion::initial(Uuid::now_v7())
    }

    fn key(n: i64, version: DatasetVersion) -> RequestKey {
        RequestKey::new(
            "value",
            &ParamSchema::Fixed(vec![ParamType::Int]),
            vec![Param::Int(n)],
            version,
        )
        .unwrap()
    }

    /// Compute closure returning `value`, counting invocations.
    fn counted(
        counter: &Arc<AtomicUsize>,
        value: i64,
        dependencies: Vec<DependencyTag>,
    ) -> impl FnOnce(EntryId) -> std::future::Ready<ResolveResult<Computed<i64>>> + Send + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(Computed::with_dependencies(value, dependencies)))
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_second_lookup_is_hit() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let k = key(1, version());

        let first = cache
            .get_or_compute(k.clone(), counted(&counter, 10, vec![]))
            .await
            .unwrap();
        let second = cache
            .get_or_compute(k.clone(), counted(&counter, 99, vec![]))
            .await
            .unwrap();

        assert_eq!(first.source(), ReadSource::Computed);
        assert!(second.was_cache_hit());
        assert_eq!(*second.value(), 10);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_coalesce() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let k = key(7, version());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let counter = Arc::clone(&counter);
            let gate = Arc::clone(&gate);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(k, move |_| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let _permit = gate
                            .acquire()
                            .await
                            .map_err(|e| ResolveError::resolution_failed("value", e.to_string()))?;
                        Ok::<_, ResolveError>(Computed::new(49))
                    })
                    .await
            }));
        }

        wait_until(|| cache.stats().unwrap().coalesced == 7).await;
        assert_eq!(cache.entry_state(&k).unwrap(), Some(EntryState::Pending));
        gate.add_permits(1);

        for handle in handles {
            let read = handle.await.unwrap().unwrap();
            assert_eq!(*read.value(), 49);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_state(&k).unwrap(), Some(EntryState::Ready));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: MemoCache<i64> = MemoCache::new(8);
        let k = key(3, version());

        let err = cache
            .get_or_compute(k.clone(), |_| async {
                Err(ResolveError::resolution_failed("value", "transient"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ResolutionFailed { .. }));
        assert_eq!(cache.entry_state(&k).unwrap(), None);

        let read = cache
            .get_or_compute(k.clone(), |_| async { Ok(Computed::new(3)) })
            .await
            .unwrap();
        assert_eq!(read.into_value(), 3);
        assert_eq!(cache.stats().unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_prefers_least_recent() {
        let cache = MemoCache::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();
        let (a, b, c) = (key(1, v), key(2, v), key(3, v));

        cache.get_or_compute(a.clone(), counted(&counter, 1, vec![])).await.unwrap();
        cache.get_or_compute(b.clone(), counted(&counter, 2, vec![])).await.unwrap();
        // Touch `a` so `b` becomes least recently used.
        assert!(cache.get(&a).unwrap().is_some());
        cache.get_or_compute(c.clone(), counted(&counter, 3, vec![])).await.unwrap();

        assert!(cache.contains(&a).unwrap());
        assert!(!cache.contains(&b).unwrap());
        assert!(cache.contains(&c).unwrap());
        assert_eq!(cache.stats().unwrap().evictions, 1);

        // Evicted entry is recomputed rather than served stale.
        let read = cache
            .get_or_compute(b.clone(), counted(&counter, 20, vec![]))
            .await
            .unwrap();
        assert_eq!(read.source(), ReadSource::Computed);
        assert_eq!(read.into_value(), 20);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_using_consumer_refreshes_its_dependencies() {
        let cache = MemoCache::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();
        let (a, b, c, d) = (key(1, v), key(2, v), key(3, v), key(4, v));

        cache.get_or_compute(a.clone(), counted(&counter, 1, vec![])).await.unwrap();
        cache
            .get_or_compute(
                b.clone(),
                counted(&counter, 2, vec![DependencyTag::entry(&a)]),
            )
            .await
            .unwrap();
        cache.get_or_compute(c.clone(), counted(&counter, 3, vec![])).await.unwrap();
        // `a` was last touched before `c`, but hitting `b` refreshes it too.
        assert!(cache.get(&b).unwrap().is_some());
        cache.get_or_compute(d.clone(), counted(&counter, 4, vec![])).await.unwrap();

        assert!(cache.contains(&a).unwrap());
        assert!(cache.contains(&b).unwrap());
        assert!(!cache.contains(&c).unwrap());
        assert!(cache.contains(&d).unwrap());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.invalidations, 0);
    }

    #[tokio::test]
    async fn test_chain_longer_than_capacity_stays_cached() {
        let cache = MemoCache::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();
        let (a, b, c) = (key(1, v), key(2, v), key(3, v));

        cache.get_or_compute(a.clone(), counted(&counter, 1, vec![])).await.unwrap();
        cache
            .get_or_compute(
                b.clone(),
                counted(&counter, 2, vec![DependencyTag::entry(&a)]),
            )
            .await
            .unwrap();
        assert_eq!(cache.len().unwrap(), 2);

        let read = cache
            .get_or_compute(b.clone(), counted(&counter, 20, vec![]))
            .await
            .unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // The next insertion reclaims the overflow, consumer first.
        cache.get_or_compute(c.clone(), counted(&counter, 3, vec![])).await.unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        assert!(cache.contains(&c).unwrap());
        assert_eq!(cache.stats().unwrap().evictions, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_invalidates_pending_dependents() {
        let cache = MemoCache::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let v = version();
        let (a, b, c) = (key(1, v), key(2, v), key(3, v));

        cache.get_or_compute(a.clone(), counted(&counter, 1, vec![])).await.unwrap();
        let consumer = {
            let cache = cache.clone();
            let gate = Arc::clone(&gate);
            let b = b.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(b, move |_| async move {
                        let _permit = gate
                            .acquire()
                            .await
                            .map_err(|e| ResolveError::resolution_failed("value", e.to_string()))?;
                        Ok::<_, ResolveError>(Computed::new(2))
                    })
                    .await
            })
        };
        wait_until(|| cache.entry_state(&b).unwrap() == Some(EntryState::Pending)).await;
        let entry = cache.entry_id(&b).unwrap().unwrap();
        assert!(cache.record_dependency(&b, entry, DependencyTag::entry(&a)).unwrap());

        // Inserting `c` evicts `a`, which takes the pending `b` with it.
        cache.get_or_compute(c.clone(), counted(&counter, 3, vec![])).await.unwrap();
        assert!(!cache.contains(&a).unwrap());
        assert_eq!(cache.entry_state(&b).unwrap(), None);

        gate.add_permits(1);
        assert_eq!(consumer.await.unwrap().unwrap().into_value(), 2);
        assert_eq!(cache.entry_state(&b).unwrap(), None);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_is_transitive() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();
        let region = DependencyTag::region(v.dataset_id, "frames");
        let (a, b, c) = (key(1, v), key(2, v), key(3, v));

        cache
            .get_or_compute(a.clone(), counted(&counter, 1, vec![region.clone()]))
            .await
            .unwrap();
        cache
            .get_or_compute(
                b.clone(),
                counted(&counter, 2, vec![DependencyTag::entry(&a)]),
            )
            .await
            .unwrap();
        cache.get_or_compute(c.clone(), counted(&counter, 3, vec![])).await.unwrap();

        // `b` inherited the region tag from `a`.
        assert!(cache.dependencies_of(&b).unwrap().contains(&region));

        assert_eq!(cache.invalidate(&region).unwrap(), 2);
        assert!(!cache.contains(&a).unwrap());
        assert!(!cache.contains(&b).unwrap());
        assert!(cache.contains(&c).unwrap());
        assert_eq!(cache.invalidate(&region).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_key_cascades() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();
        let (a, b) = (key(1, v), key(2, v));

        cache.get_or_compute(a.clone(), counted(&counter, 1, vec![])).await.unwrap();
        cache
            .get_or_compute(
                b.clone(),
                counted(&counter, 2, vec![DependencyTag::entry(&a)]),
            )
            .await
            .unwrap();

        assert_eq!(cache.invalidate_key(&a).unwrap(), 2);
        assert!(cache.is_empty().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidated_pending_result_not_stored() {
        let cache = MemoCache::new(8);
        let gate = Arc::new(Semaphore::new(0));
        let v = version();
        let k = key(5, v);
        let dataset_tag = DependencyTag::Dataset(v.dataset_id);

        let waiter = {
            let cache = cache.clone();
            let gate = Arc::clone(&gate);
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(k, move |_| async move {
                        let _permit = gate
                            .acquire()
                            .await
                            .map_err(|e| ResolveError::resolution_failed("value", e.to_string()))?;
                        Ok::<_, ResolveError>(Computed::new(5))
                    })
                    .await
            })
        };

        wait_until(|| cache.entry_state(&k).unwrap() == Some(EntryState::Pending)).await;
        let entry = cache.entry_id(&k).unwrap().unwrap();
        assert!(cache.record_dependency(&k, entry, dataset_tag.clone()).unwrap());
        assert_eq!(cache.invalidate(&dataset_tag).unwrap(), 1);
        assert_eq!(cache.entry_state(&k).unwrap(), None);

        gate.add_permits(1);
        let read = waiter.await.unwrap().unwrap();
        assert_eq!(read.into_value(), 5);
        assert_eq!(cache.entry_state(&k).unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_wait_does_not_cancel_computation() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let k = key(11, version());

        let compute = {
            let counter = Arc::clone(&counter);
            let gate = Arc::clone(&gate);
            move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| ResolveError::resolution_failed("value", e.to_string()))?;
                Ok::<_, ResolveError>(Computed::new(11))
            }
        };

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), cache.get_or_compute(k.clone(), compute))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.entry_state(&k).unwrap(), Some(EntryState::Pending));

        gate.add_permits(1);
        wait_until(|| cache.contains(&k).unwrap()).await;

        let read = cache
            .get_or_compute(k.clone(), counted(&counter, 0, vec![]))
            .await
            .unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), 11);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_computation_releases_entry() {
        let cache: MemoCache<i64> = MemoCache::new(8);
        let k = key(13, version());
        let explode = true;

        let err = cache
            .get_or_compute(k.clone(), move |_| async move {
                if explode {
                    panic!("resolver exploded");
                }
                Ok(Computed::new(0))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ResolutionFailed { .. }));
        assert_eq!(cache.entry_state(&k).unwrap(), None);

        let read = cache
            .get_or_compute(k.clone(), |_| async { Ok(Computed::new(13)) })
            .await
            .unwrap();
        assert_eq!(read.into_value(), 13);
    }

    #[tokio::test]
    async fn test_record_dependency_requires_entry() {
        let cache: MemoCache<i64> = MemoCache::new(8);
        let v = version();
        let k = key(1, v);
        assert!(!cache
            .record_dependency(&k, EntryId(1), DependencyTag::Dataset(v.dataset_id))
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_computation_cannot_record_on_successor() {
        let cache = MemoCache::new(8);
        let gate = Arc::new(Semaphore::new(0));
        let v = version();
        let k = key(21, v);
        let late = DependencyTag::region(v.dataset_id, "late");
        let own = DependencyTag::region(v.dataset_id, "own");

        let start = |cache: &MemoCache<i64>| {
            let cache = cache.clone();
            let gate = Arc::clone(&gate);
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(k, move |_| async move {
                        let _permit = gate
                            .acquire()
                            .await
                            .map_err(|e| ResolveError::resolution_failed("value", e.to_string()))?;
                        Ok::<_, ResolveError>(Computed::new(21))
                    })
                    .await
            })
        };

        let first = start(&cache);
        wait_until(|| cache.entry_state(&k).unwrap() == Some(EntryState::Pending)).await;
        let stale = cache.entry_id(&k).unwrap().unwrap();
        assert_eq!(cache.invalidate_key(&k).unwrap(), 1);

        let second = start(&cache);
        wait_until(|| cache.entry_state(&k).unwrap() == Some(EntryState::Pending)).await;
        let current = cache.entry_id(&k).unwrap().unwrap();
        assert_ne!(stale, current);

        assert!(!cache.record_dependency(&k, stale, late.clone()).unwrap());
        assert!(cache.record_dependency(&k, current, own.clone()).unwrap());
        let dependencies = cache.dependencies_of(&k).unwrap();
        assert!(dependencies.contains(&own));
        assert!(!dependencies.contains(&late));

        gate.add_permits(2);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert!(cache.contains(&k).unwrap());
        assert_eq!(cache.entry_id(&k).unwrap(), Some(current));
        assert_eq!(cache.invalidate(&late).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = MemoCache::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let v = version();

        for n in 0..4 {
            cache
                .get_or_compute(key(n, v), counted(&counter, n, vec![DependencyTag::Dataset(v.dataset_id)]))
                .await
                .unwrap();
        }
        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 4);
        assert_eq!(stats.tracked_tags, 1);
        assert_eq!(stats.tracked_entries, 4);

        assert_eq!(cache.clear().unwrap(), 4);
        assert!(cache.is_empty().unwrap());
        assert_eq!(cache.stats().unwrap().tracked_tags, 0);
        assert_eq!(cache.invalidate(&DependencyTag::Dataset(v.dataset_id)).unwrap(), 0);
    }

    #[test]
    fn test_capacity_has_floor() {
        let cache: MemoCache<i64> = MemoCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
