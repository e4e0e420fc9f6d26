//! Closed registry mapping query kinds to resolvers.
//!
//! Resolvers are registered on a [`RegistryBuilder`] during initialisation.
//! [`RegistryBuilder::build`] produces an immutable [`Registry`]; there is no
//! way to add or replace a resolver once resolution has started.

use crate::resolver::{FnResolver, Resolver};
use resolve_core::{
    Dataset, DatasetVersion, Param, ParamSchema, QueryKind, RequestKey, ResolveError,
    ResolveResult,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct Registration<D, V> {
    schema: ParamSchema,
    resolver: Arc<dyn Resolver<D, V>>,
}

impl<D, V> Clone for Registration<D, V> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

/// Collects resolvers before the registry is frozen.
pub struct RegistryBuilder<D, V> {
    registrations: HashMap<QueryKind, Registration<D, V>>,
}

impl<D, V> RegistryBuilder<D, V>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register `resolver` for `kind`.
    ///
    /// Fails with `DuplicateKind` if the kind already has a resolver.
    pub fn register<R>(&mut self, kind: impl Into<QueryKind>, resolver: R) -> ResolveResult<&mut Self>
    where
        R: Resolver<D, V> + 'static,
    {
        self.register_arc(kind, Arc::new(resolver))
    }

    /// Register an already shared resolver for `kind`.
    pub fn register_arc(
        &mut self,
        kind: impl Into<QueryKind>,
        resolver: Arc<dyn Resolver<D, V>>,
    ) -> ResolveResult<&mut Self> {
        let kind = kind.into();
        if self.registrations.contains_key(&kind) {
            return Err(ResolveError::DuplicateKind {
                kind: kind.to_string(),
            });
        }
        let schema = resolver.schema();
        tracing::debug!(kind = %kind, schema = ?schema, "registered resolver");
        self.registrations
            .insert(kind, Registration { schema, resolver });
        Ok(self)
    }

    /// Register a synchronous pure function for `kind`.
    pub fn register_fn<F>(
        &mut self,
        kind: impl Into<QueryKind>,
        schema: ParamSchema,
        func: F,
    ) -> ResolveResult<&mut Self>
    where
        F: Fn(&D, &[Param]) -> ResolveResult<V> + Send + Sync + 'static,
    {
        self.register(kind, FnResolver::new(schema, func))
    }

    /// Freeze the registry.
    pub fn build(self) -> Registry<D, V> {
        Registry {
            registrations: Arc::new(self.registrations),
        }
    }
}

impl<D, V> Default for RegistryBuilder<D, V>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable kind -> resolver table. Cloning shares the table.
pub struct Registry<D, V> {
    registrations: Arc<HashMap<QueryKind, Registration<D, V>>>,
}

impl<D, V> Clone for Registry<D, V> {
    fn clone(&self) -> Self {
        Self {
            registrations: Arc::clone(&self.registrations),
        }
    }
}

impl<D, V> Registry<D, V>
where
    D: Dataset,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> RegistryBuilder<D, V> {
        RegistryBuilder::new()
    }

    fn registration(&self, kind: &str) -> ResolveResult<&Registration<D, V>> {
        self.registrations
            .get(kind)
            .ok_or_else(|| ResolveError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Resolver registered for `kind`.
    pub fn lookup(&self, kind: &str) -> ResolveResult<Arc<dyn Resolver<D, V>>> {
        Ok(Arc::clone(&self.registration(kind)?.resolver))
    }

    /// Declared parameter schema of `kind`.
    pub fn schema(&self, kind: &str) -> ResolveResult<&ParamSchema> {
        Ok(&self.registration(kind)?.schema)
    }

    /// Build a validated key for `kind` against the given dataset version.
    pub fn make_key(
        &self,
        kind: &str,
        params: Vec<Param>,
        version: DatasetVersion,
    ) -> ResolveResult<RequestKey> {
        let schema = self.schema(kind)?;
        RequestKey::new(kind, schema, params, version)
    }

    /// Registered kinds in name order.
    pub fn kinds(&self) -> Vec<&QueryKind> {
        let mut kinds: Vec<_> = self.registrations.keys().collect();
        kinds.sort();
        kinds
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.registrations.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl<D, V> fmt::Debug for Registry<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.registrations.keys().map(QueryKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_core::{ParamType, RecordSnapshot};

    type Numbers = RecordSnapshot<i64>;

    fn builder() -> RegistryBuilder<Numbers, i64> {
        let mut builder: RegistryBuilder<Numbers, i64> = RegistryBuilder::new();
        builder
            .register_fn("count", ParamSchema::none(), |data: &Numbers, _| {
                Ok(data.len() as i64)
            })
            .unwrap()
            .register_fn(
                "sum",
                ParamSchema::Variadic(ParamType::Int),
                |_: &Numbers, params| Ok(params.iter().filter_map(Param::as_int).sum()),
            )
            .unwrap();
        builder
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let mut builder = builder();
        let result = builder.register_fn("sum", ParamSchema::none(), |_: &Numbers, _| Ok(0));
        assert!(matches!(
            result,
            Err(ResolveError::DuplicateKind { kind }) if kind == "sum"
        ));
    }

    #[test]
    fn test_lookup_unknown_kind() {
        let registry = builder().build();
        assert!(matches!(
            registry.lookup("product"),
            Err(ResolveError::UnknownKind { kind }) if kind == "product"
        ));
        assert!(registry.lookup("sum").is_ok());
    }

    #[test]
    fn test_kinds_sorted() {
        let registry = builder().build();
        let kinds: Vec<&str> = registry.kinds().into_iter().map(QueryKind::as_str).collect();
        assert_eq!(kinds, vec!["count", "sum"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("count"));
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_make_key_validates_against_schema() {
        let registry = builder().build();
        let snapshot = Numbers::new(vec![1, 2]);

        let key = registry
            .make_key("sum", vec![Param::Int(2), Param::Int(3)], snapshot.version())
            .unwrap();
        assert_eq!(key.kind().as_str(), "sum");
        assert_eq!(key.version(), snapshot.version());

        let err = registry
            .make_key("count", vec![Param::Int(1)], snapshot.version())
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidParameter { index: 0, .. }));

        let err = registry
            .make_key("product", vec![], snapshot.version())
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownKind { .. }));
    }
}
