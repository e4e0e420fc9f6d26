//! Property tests for resolution invariants.

use proptest::prelude::*;
use resolve_test_utils::fixtures::*;
use resolve_test_utils::generators::*;
use resolve_test_utils::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Repeating a request returns the same value with one resolver call.
    #[test]
    fn prop_resolution_is_idempotent(
        values in prop::collection::vec(any::<i32>(), 0..12),
        repeats in 2usize..6,
    ) {
        let params: Vec<Param> = values.iter().map(|v| Param::Int(i64::from(*v))).collect();
        let expected: i64 = values.iter().map(|v| i64::from(*v)).sum();

        let sum = CountingResolver::new();
        let calls = sum.counter();
        let engine = sum_engine(sum, ResolveConfig::default()).unwrap();
        let data = numbers_snapshot(&[]);

        let results = runtime().block_on(async {
            let mut results = Vec::new();
            for _ in 0..repeats {
                results.push(engine.resolve("sum", params.clone(), data.clone()).await);
            }
            results
        });

        for result in results {
            prop_assert_eq!(result, Ok(expected));
        }
        prop_assert_eq!(calls.get(), 1);
    }

    /// Parameters that do not fit the schema are rejected at the first
    /// offending position without invoking the resolver.
    #[test]
    fn prop_schema_violations_rejected(params in arb_params(8)) {
        let first_bad = params.iter().position(|p| p.param_type() != ParamType::Int);

        let sum = CountingResolver::new();
        let calls = sum.counter();
        let engine = sum_engine(sum, ResolveConfig::default()).unwrap();
        let result = runtime().block_on(engine.resolve("sum", params, numbers_snapshot(&[])));

        match first_bad {
            Some(index) => {
                let is_rejected_at = matches!(
                    result,
                    Err(ResolveError::InvalidParameter { index: i, .. }) if i == index
                );
                prop_assert!(is_rejected_at);
                prop_assert_eq!(calls.get(), 0);
            }
            None => {
                prop_assert!(result.is_ok());
                prop_assert_eq!(calls.get(), 1);
            }
        }
    }

    /// Keys are equal exactly when their canonical encodings are equal.
    #[test]
    fn prop_key_equality_matches_encoding(a in arb_request_key(), b in arb_request_key()) {
        prop_assert_eq!(a == b, a.encode() == b.encode());
        prop_assert_eq!(a.clone(), a);
    }
}
