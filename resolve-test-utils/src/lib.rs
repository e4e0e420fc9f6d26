//! Resolve Test Utilities
//!
//! Shared test infrastructure for the resolve workspace:
//! - Proptest generators for parameters, versions and keys
//! - Instrumented resolvers and a ready-made registry
//! - Helpers for coordinating concurrent tests

pub use resolve_cache::{CacheRead, CacheStats, EntryState, ReadSource};
pub use resolve_core::{
    Dataset, DatasetVersion, DependencyTag, Param, ParamSchema, ParamType, RecordSnapshot,
    RequestKey, ResolveConfig, ResolveError, ResolveResult,
};
pub use resolve_engine::{
    Registry, RegistryBuilder, ResolutionEngine, ResolveContext, ResolveOptions, Resolver,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for resolve types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a parameter of any type.
    pub fn arb_param() -> impl Strategy<Value = Param> {
        prop_oneof![
            any::<bool>().prop_map(Param::Bool),
            any::<i64>().prop_map(Param::Int),
            any::<u64>().prop_map(Param::UInt),
            any::<f64>().prop_map(Param::Float),
            "[a-z0-9 ]{0,16}".prop_map(Param::Str),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Param::Bytes),
            arb_uuid().prop_map(Param::Id),
        ]
    }

    /// Generate a parameter list of up to `max_len` entries.
    pub fn arb_params(max_len: usize) -> impl Strategy<Value = Vec<Param>> {
        prop::collection::vec(arb_param(), 0..=max_len)
    }

    /// Generate a dataset version.
    pub fn arb_dataset_version() -> impl Strategy<Value = DatasetVersion> {
        (arb_uuid(), 0u64..10_000).prop_map(|(id, sequence)| DatasetVersion::new(id, sequence))
    }

    /// Generate a query kind name.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,11}"
    }

    /// Generate a valid key whose schema is exactly its parameter types.
    pub fn arb_request_key() -> impl Strategy<Value = RequestKey> {
        (arb_kind(), arb_params(6), arb_dataset_version()).prop_filter_map(
            "key must validate",
            |(kind, params, version)| {
                let schema = ParamSchema::Fixed(params.iter().map(Param::param_type).collect());
                RequestKey::new(kind, &schema, params, version).ok()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built datasets, resolvers and registries.

    use super::*;

    /// Dataset type used throughout the fixtures.
    pub type Numbers = RecordSnapshot<i64>;

    /// Region every [`CountingResolver`] result depends on by default.
    pub const NUMBERS_REGION: &str = "numbers";

    /// Initial snapshot holding `values`.
    pub fn numbers_snapshot(values: &[i64]) -> Arc<Numbers> {
        Arc::new(Numbers::new(values.to_vec()))
    }

    /// Release valve for blocking resolvers until a test is ready.
    ///
    /// Each pass through the gate consumes one permit.
    #[derive(Debug, Clone)]
    pub struct Gate {
        permits: Arc<Semaphore>,
    }

    impl Gate {
        /// A closed gate.
        pub fn new() -> Self {
            Self {
                permits: Arc::new(Semaphore::new(0)),
            }
        }

        /// Let `n` more passes through.
        pub fn release(&self, n: usize) {
            self.permits.add_permits(n);
        }

        /// Wait for a permit and consume it.
        pub async fn pass(&self) -> ResolveResult<()> {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ResolveError::resolution_failed("gate", e.to_string()))?;
            permit.forget();
            Ok(())
        }
    }

    impl Default for Gate {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Shared invocation counter.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        fn bump(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    /// Sums its integer parameters (wrapping), counting every invocation.
    ///
    /// Can be told to fail its first N invocations or to block on a [`Gate`]
    /// before answering.
    #[derive(Debug, Clone, Default)]
    pub struct CountingResolver {
        calls: CallCounter,
        fail_first: usize,
        gate: Option<Gate>,
        region: Option<String>,
    }

    impl CountingResolver {
        /// A resolver depending on [`NUMBERS_REGION`].
        pub fn new() -> Self {
            Self {
                region: Some(NUMBERS_REGION.to_string()),
                ..Self::default()
            }
        }

        pub fn failing_first(mut self, n: usize) -> Self {
            self.fail_first = n;
            self
        }

        pub fn gated(mut self, gate: Gate) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn depending_on(mut self, region: impl Into<String>) -> Self {
            self.region = Some(region.into());
            self
        }

        /// Counter shared with every clone of this resolver.
        pub fn counter(&self) -> CallCounter {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl Resolver<Numbers, i64> for CountingResolver {
        fn schema(&self) -> ParamSchema {
            ParamSchema::Variadic(ParamType::Int)
        }

        async fn resolve(
            &self,
            ctx: &ResolveContext<Numbers, i64>,
            params: &[Param],
        ) -> ResolveResult<i64> {
            let call = self.calls.bump();
            if let Some(gate) = &self.gate {
                gate.pass().await?;
            }
            if call <= self.fail_first {
                return Err(ctx.fail(format!("planned failure {} of {}", call, self.fail_first)));
            }
            if let Some(region) = &self.region {
                ctx.depend_on_region(region.as_str())?;
            }
            Ok(params
                .iter()
                .filter_map(Param::as_int)
                .fold(0, i64::wrapping_add))
        }
    }

    /// Resolves `sum` with the same parameters and doubles it.
    #[derive(Debug, Clone, Default)]
    pub struct DoublingResolver {
        calls: CallCounter,
    }

    impl DoublingResolver {
        pub fn counter(&self) -> CallCounter {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl Resolver<Numbers, i64> for DoublingResolver {
        fn schema(&self) -> ParamSchema {
            ParamSchema::Variadic(ParamType::Int)
        }

        async fn resolve(
            &self,
            ctx: &ResolveContext<Numbers, i64>,
            params: &[Param],
        ) -> ResolveResult<i64> {
            self.calls.bump();
            let sum = ctx.resolve("sum", params.to_vec()).await?;
            Ok(sum.wrapping_mul(2))
        }
    }

    /// Registry with:
    /// - `sum(ints...)`: the given counting resolver
    /// - `doubled(ints...)`: `2 * sum(ints...)` through a sub-query
    /// - `total()`: sum of every record in the dataset
    /// - `count()`: number of records
    pub fn sum_registry(
        sum: CountingResolver,
        doubled: DoublingResolver,
    ) -> ResolveResult<Registry<Numbers, i64>> {
        let mut builder: RegistryBuilder<Numbers, i64> = RegistryBuilder::new();
        builder
            .register("sum", sum)?
            .register("doubled", doubled)?
            .register_fn("total", ParamSchema::none(), |data: &Numbers, _| {
                Ok(data.records().iter().sum())
            })?
            .register_fn("count", ParamSchema::none(), |data: &Numbers, _| {
                Ok(data.len() as i64)
            })?;
        Ok(builder.build())
    }

    /// Engine over [`sum_registry`] with the given configuration.
    pub fn sum_engine(
        sum: CountingResolver,
        config: ResolveConfig,
    ) -> ResolveResult<ResolutionEngine<Numbers, i64>> {
        ResolutionEngine::new(sum_registry(sum, DoublingResolver::default())?, config)
    }

    /// Poll `condition` every millisecond until it holds.
    ///
    /// Panics after `timeout`.
    pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
        let polled = tokio::time::timeout(timeout, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "condition not reached within {:?}", timeout);
    }
}

// ============================================================================
// TESTS
// ============================================================================
