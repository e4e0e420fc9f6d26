//! Resolve Engine - Memoizing Query Resolution
//!
//! Answers typed queries over immutable, versioned datasets. Each query kind
//! is served by a [`Resolver`] registered once at startup. Results are
//! memoized per (kind, parameters, dataset version), concurrent identical
//! requests share one computation, and recorded dependencies drive
//! invalidation.
//!
//! ```ignore
//! let mut builder = RegistryBuilder::new();
//! builder.register_fn("sum", ParamSchema::Variadic(ParamType::Int), |_, params| {
//!     Ok(params.iter().filter_map(Param::as_int).sum::<i64>())
//! })?;
//! let engine = ResolutionEngine::new(builder.build(), ResolveConfig::from_env()?)?;
//! let total = engine.resolve("sum", vec![2.into(), 3.into()], snapshot).await?;
//! ```

pub mod context;
pub mod engine;
pub mod options;
pub mod registry;
pub mod resolver;
pub mod telemetry;

pub use context::ResolveContext;
pub use engine::ResolutionEngine;
pub use options::ResolveOptions;
pub use registry::{Registry, RegistryBuilder};
pub use resolver::{FnResolver, Resolver};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use resolve_cache::{CacheRead, CacheStats, EntryId, EntryState, MemoCache, ReadSource};
pub use resolve_core::{
    Dataset, DatasetId, DatasetVersion, DependencyTag, Param, ParamSchema, ParamType, QueryKind,
    RecordSnapshot, RequestKey, ResolveConfig, ResolveError, ResolveResult,
};
pub use tokio_util::sync::CancellationToken;
