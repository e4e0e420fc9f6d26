//! Per-computation context handed to resolvers.

use crate::engine::ResolutionEngine;
use crate::options::ResolveOptions;
use resolve_cache::EntryId;
use resolve_core::{
    Dataset, DatasetVersion, DependencyTag, Param, RequestKey, ResolveError, ResolveResult,
};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Keys currently being resolved above a computation, outermost first.
pub(crate) type Ancestry = Arc<[RequestKey]>;

/// What a resolver sees while computing one entry.
///
/// The context gives read access to the dataset snapshot the key was built
/// against and records everything the result is derived from. Dependencies
/// are recorded on the pending entry as they are declared, so an
/// invalidation that races with the computation still prevents its result
/// from being stored. Once the entry has been invalidated, later declarations
/// are dropped instead of landing on a newer computation of the same key.
pub struct ResolveContext<D, V> {
    engine: ResolutionEngine<D, V>,
    dataset: Arc<D>,
    key: RequestKey,
    entry: EntryId,
    ancestry: Ancestry,
}

impl<D, V> ResolveContext<D, V>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        engine: ResolutionEngine<D, V>,
        dataset: Arc<D>,
        key: RequestKey,
        entry: EntryId,
        ancestry: Ancestry,
    ) -> Self {
        Self {
            engine,
            dataset,
            key,
            entry,
            ancestry,
        }
    }

    /// The dataset snapshot this computation reads.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Key of the entry being computed.
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn version(&self) -> DatasetVersion {
        self.key.version()
    }

    pub fn params(&self) -> &[Param] {
        self.key.params()
    }

    /// Number of enclosing computations on this resolution chain.
    pub fn depth(&self) -> usize {
        self.ancestry.len()
    }

    /// Declare that the result is derived from `tag`.
    pub fn depend_on(&self, tag: DependencyTag) -> ResolveResult<()> {
        self.engine
            .cache()
            .record_dependency(&self.key, self.entry, tag)?;
        Ok(())
    }

    /// Declare that the result is derived from a named region of the dataset.
    pub fn depend_on_region(&self, region: impl Into<String>) -> ResolveResult<()> {
        self.depend_on(DependencyTag::region(self.key.dataset_id(), region))
    }

    /// Resolve another query against the same dataset snapshot and record
    /// the result as a dependency of this entry.
    ///
    /// Fails with `DependencyCycle` if the sub-query is already being
    /// resolved further up this chain.
    pub async fn resolve(&self, kind: &str, params: Vec<Param>) -> ResolveResult<V> {
        let sub_key = self
            .engine
            .registry()
            .make_key(kind, params, self.version())?;

        if sub_key == self.key || self.ancestry.contains(&sub_key) {
            warn!(key = %self.key, sub_query = %sub_key, "dependency cycle");
            return Err(ResolveError::DependencyCycle {
                key: sub_key.to_string(),
            });
        }

        let dependency = DependencyTag::entry(&sub_key);
        self.depend_on(dependency.clone())?;

        let mut chain = self.ancestry.to_vec();
        chain.push(self.key.clone());
        let read = self
            .engine
            .resolve_key(
                sub_key,
                Arc::clone(&self.dataset),
                chain.into(),
                ResolveOptions::default(),
            )
            .await?;

        // Inherit the sub-result's own tags now that they are recorded.
        self.depend_on(dependency)?;
        Ok(read.into_value())
    }

    /// A `ResolutionFailed` error for this entry's kind.
    pub fn fail(&self, reason: impl Into<String>) -> ResolveError {
        ResolveError::resolution_failed(self.key.kind().as_str(), reason)
    }
}

impl<D, V> fmt::Debug for ResolveContext<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveContext")
            .field("key", &self.key)
            .field("entry", &self.entry)
            .field("depth", &self.ancestry.len())
            .finish_non_exhaustive()
    }
}
