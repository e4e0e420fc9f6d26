//! Resolver trait and function-backed resolvers.

use crate::context::ResolveContext;
use async_trait::async_trait;
use resolve_core::{Dataset, Param, ParamSchema, ResolveResult};
use std::fmt;
use std::marker::PhantomData;

/// Computes the value of one query kind from a dataset snapshot.
///
/// Implementations must be pure with respect to the snapshot: the same
/// parameters over the same dataset version must yield the same value.
/// Everything else a result depends on should be declared through the
/// context so the entry can be invalidated.
#[async_trait]
pub trait Resolver<D, V>: Send + Sync {
    /// Parameter types accepted by this kind.
    fn schema(&self) -> ParamSchema;

    /// Compute the value for `params` (already validated against `schema`).
    async fn resolve(&self, ctx: &ResolveContext<D, V>, params: &[Param]) -> ResolveResult<V>;
}

/// Adapter turning a synchronous pure function into a [`Resolver`].
pub struct FnResolver<D, V, F> {
    schema: ParamSchema,
    func: F,
    _marker: PhantomData<fn(&D) -> V>,
}

impl<D, V, F> FnResolver<D, V, F>
where
    F: Fn(&D, &[Param]) -> ResolveResult<V> + Send + Sync,
{
    pub fn new(schema: ParamSchema, func: F) -> Self {
        Self {
            schema,
            func,
            _marker: PhantomData,
        }
    }
}

impl<D, V, F> fmt::Debug for FnResolver<D, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnResolver")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D, V, F> Resolver<D, V> for FnResolver<D, V, F>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
    F: Fn(&D, &[Param]) -> ResolveResult<V> + Send + Sync,
{
    fn schema(&self) -> ParamSchema {
        self.schema.clone()
    }

    async fn resolve(&self, ctx: &ResolveContext<D, V>, params: &[Param]) -> ResolveResult<V> {
        (self.func)(ctx.dataset(), params)
    }
}
