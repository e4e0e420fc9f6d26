//! The resolution engine.
//!
//! Every request moves through the same steps:
//!
//! ```text
//! Requested -> KeyBuilt -> CacheConsulted -+-> Hit ---------------------------> Returned
//!                                          +-> Miss -> Resolving -+-> Succeeded -> Returned
//!                                                                 +-> Failed ----> ErrorReturned
//! ```
//!
//! The engine builds the key from the registry, consults the cache, and on a
//! miss hands the cache a computation that runs the kind's resolver with a
//! [`ResolveContext`]. Each computation implicitly depends on its dataset.

use crate::context::{Ancestry, ResolveContext};
use crate::options::ResolveOptions;
use crate::registry::Registry;
use resolve_cache::{CacheRead, CacheStats, Computed, EntryId, MemoCache};
use resolve_core::{
    Dataset, DatasetId, DependencyTag, Param, RequestKey, ResolveConfig, ResolveError,
    ResolveResult,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

type ReadFuture<V> = Pin<Box<dyn Future<Output = ResolveResult<CacheRead<V>>> + Send>>;

/// Memoizing query engine over datasets of type `D` producing values `V`.
///
/// Cheap to clone; clones share the registry, cache and configuration.
pub struct ResolutionEngine<D, V> {
    inner: Arc<EngineInner<D, V>>,
}

struct EngineInner<D, V> {
    registry: Registry<D, V>,
    cache: MemoCache<V>,
    config: ResolveConfig,
}

impl<D, V> Clone for ResolutionEngine<D, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, V> ResolutionEngine<D, V>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
{
    /// Create an engine with a frozen registry and validated configuration.
    pub fn new(registry: Registry<D, V>, config: ResolveConfig) -> ResolveResult<Self> {
        config.validate()?;
        info!(
            kinds = registry.len(),
            cache_capacity = config.cache_capacity,
            default_timeout_ms = config.default_timeout.map(|t| t.as_millis() as u64),
            "resolution engine created"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                cache: MemoCache::new(config.cache_capacity),
                registry,
                config,
            }),
        })
    }

    /// Resolve `kind(params)` against `dataset`.
    pub async fn resolve(&self, kind: &str, params: Vec<Param>, dataset: Arc<D>) -> ResolveResult<V> {
        self.resolve_with(kind, params, dataset, ResolveOptions::default())
            .await
    }

    /// Resolve with a per-call deadline and/or cancellation token.
    pub async fn resolve_with(
        &self,
        kind: &str,
        params: Vec<Param>,
        dataset: Arc<D>,
        options: ResolveOptions,
    ) -> ResolveResult<V> {
        let read = self.resolve_read(kind, params, dataset, options).await?;
        Ok(read.into_value())
    }

    /// Resolve and report whether the value was a hit, freshly computed or
    /// shared with a concurrent caller.
    pub async fn resolve_read(
        &self,
        kind: &str,
        params: Vec<Param>,
        dataset: Arc<D>,
        options: ResolveOptions,
    ) -> ResolveResult<CacheRead<V>> {
        trace!(kind, "requested");
        let key = self.make_key(kind, params, dataset.as_ref())?;
        trace!(key = %key, "key built");
        self.resolve_key(key, dataset, Arc::from(Vec::new()), options)
            .await
    }

    /// Build the key a request would use, without resolving it.
    pub fn make_key(&self, kind: &str, params: Vec<Param>, dataset: &D) -> ResolveResult<RequestKey> {
        self.inner.registry.make_key(kind, params, dataset.version())
    }

    /// Look up or compute `key`. Boxed because resolvers recurse through it.
    pub(crate) fn resolve_key(
        &self,
        key: RequestKey,
        dataset: Arc<D>,
        ancestry: Ancestry,
        options: ResolveOptions,
    ) -> ReadFuture<V> {
        let engine = self.clone();
        Box::pin(async move {
            let deadline = options.effective_deadline(engine.inner.config.default_timeout);
            let kind = key.kind().to_string();

            let computation = {
                let engine = engine.clone();
                let key = key.clone();
                move |entry: EntryId| {
                    let span = tracing::debug_span!(
                        "resolve",
                        kind = %key.kind(),
                        key_id = %key.short_id(),
                        entry = %entry,
                        depth = ancestry.len(),
                    );
                    engine
                        .run_resolver(key, entry, dataset, ancestry)
                        .instrument(span)
                }
            };

            let lookup = engine.inner.cache.get_or_compute(key.clone(), computation);
            let read = bounded_wait(&kind, lookup, deadline, options.cancellation()).await?;
            trace!(key = %key, source = ?read.source(), "cache consulted, returning");
            Ok(read)
        })
    }

    async fn run_resolver(
        self,
        key: RequestKey,
        entry: EntryId,
        dataset: Arc<D>,
        ancestry: Ancestry,
    ) -> ResolveResult<Computed<V>> {
        let resolver = self.inner.registry.lookup(key.kind().as_str())?;
        self.inner
            .cache
            .record_dependency(&key, entry, DependencyTag::Dataset(key.dataset_id()))?;

        let ctx = ResolveContext::new(self.clone(), dataset, key.clone(), entry, ancestry);
        trace!(key = %key, "resolving");
        let started = Instant::now();
        let result = resolver.resolve(&ctx, key.params()).await;
        let elapsed = started.elapsed();

        if elapsed >= self.inner.config.slow_resolution_threshold {
            warn!(
                key = %key,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow resolution"
            );
        }

        match result {
            Ok(value) => {
                trace!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "succeeded");
                Ok(Computed::new(value))
            }
            Err(err) => {
                debug!(key = %key, error = %err, "failed");
                Err(err)
            }
        }
    }

    /// Remove every entry derived from `tag`, transitively.
    pub fn invalidate(&self, tag: &DependencyTag) -> ResolveResult<usize> {
        self.inner.cache.invalidate(tag)
    }

    /// Remove every entry computed from any version of a dataset.
    pub fn invalidate_dataset(&self, dataset_id: DatasetId) -> ResolveResult<usize> {
        self.invalidate(&DependencyTag::Dataset(dataset_id))
    }

    pub fn stats(&self) -> ResolveResult<CacheStats> {
        self.inner.cache.stats()
    }

    pub fn cache(&self) -> &MemoCache<V> {
        &self.inner.cache
    }

    pub fn registry(&self) -> &Registry<D, V> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.inner.config
    }
}

impl<D, V> fmt::Debug for ResolutionEngine<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Wait for `lookup`, giving up at `deadline` or when `cancellation` fires.
///
/// Giving up only drops this caller's wait; the computation itself lives on
/// a detached task.
async fn bounded_wait<T>(
    kind: &str,
    lookup: impl Future<Output = ResolveResult<T>>,
    deadline: Option<Instant>,
    cancellation: Option<&CancellationToken>,
) -> ResolveResult<T> {
    let timed = async {
        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, lookup).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(kind, "deadline exceeded, abandoning wait");
                    Err(ResolveError::DeadlineExceeded {
                        kind: kind.to_string(),
                    })
                }
            },
            None => lookup.await,
        }
    };

    match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(kind, "cancelled, abandoning wait");
                    Err(ResolveError::Cancelled {
                        kind: kind.to_string(),
                    })
                }
                result = timed => result,
            }
        }
        None => timed.await,
    }
}
