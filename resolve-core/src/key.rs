//! Canonical request identity.
//!
//! A [`RequestKey`] names one query (kind + parameters) evaluated against one
//! dataset version. Keys can only be built through [`RequestKey::new`], which
//! validates the parameters against the kind's schema, so every key held by
//! the cache is well-formed by construction.

use crate::dataset::{DatasetId, DatasetVersion};
use crate::error::ResolveResult;
use crate::param::{Param, ParamSchema};
use crate::{compute_content_hash, ContentHash};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Magic prefix of the canonical key encoding.
const KEY_MAGIC: &[u8; 4] = b"RQK1";

/// Separator byte between the kind name and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Name of a query kind, e.g. `"sum"` or `"frame_state"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKind(String);

impl QueryKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for QueryKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for QueryKind {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a query evaluated against a specific dataset snapshot.
///
/// Equality and hashing are structural over kind, parameters and dataset
/// version. The inner data sits behind an `Arc` so keys are cheap to clone
/// into cache indexes and dependency tables.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    inner: Arc<KeyInner>,
}

/// Private inner struct - prevents construction without validation.
#[derive(Debug, PartialEq, Eq, Hash)]
struct KeyInner {
    kind: QueryKind,
    params: Vec<Param>,
    version: DatasetVersion,
}

impl RequestKey {
    /// Build a key, validating `params` against the kind's `schema`.
    ///
    /// Deterministic and pure: equal inputs always produce equal keys.
    pub fn new(
        kind: impl Into<QueryKind>,
        schema: &ParamSchema,
        params: Vec<Param>,
        version: DatasetVersion,
    ) -> ResolveResult<Self> {
        let kind = kind.into();
        schema.validate(kind.as_str(), &params)?;
        Ok(Self {
            inner: Arc::new(KeyInner {
                kind,
                params,
                version,
            }),
        })
    }

    pub fn kind(&self) -> &QueryKind {
        &self.inner.kind
    }

    pub fn params(&self) -> &[Param] {
        &self.inner.params
    }

    pub fn version(&self) -> DatasetVersion {
        self.inner.version
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.inner.version.dataset_id
    }

    /// Encode this key to its canonical byte form.
    ///
    /// Format:
    /// `[magic: 4][kind_len: u32][kind bytes][0xFF][dataset_id: 16][sequence: u64]
    ///  [param_count: u32][params...]`
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.inner.kind.as_str().as_bytes();
        let mut buf = Vec::with_capacity(4 + 4 + kind.len() + 1 + 24 + 4 + self.params().len() * 9);
        buf.extend_from_slice(KEY_MAGIC);
        buf.extend_from_slice(&(kind.len() as u32).to_be_bytes());
        buf.extend_from_slice(kind);
        buf.push(SEPARATOR);
        buf.extend_from_slice(self.inner.version.dataset_id.as_bytes());
        buf.extend_from_slice(&self.inner.version.sequence.to_be_bytes());
        buf.extend_from_slice(&(self.inner.params.len() as u32).to_be_bytes());
        for param in &self.inner.params {
            param.encode_into(&mut buf);
        }
        buf
    }

    /// SHA-256 content address of the canonical encoding.
    pub fn digest(&self) -> ContentHash {
        compute_content_hash(&self.encode())
    }

    /// Short hex prefix of the digest, for log correlation.
    pub fn short_id(&self) -> String {
        hex::encode(&self.digest()[..6])
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestKey")
            .field("kind", &self.inner.kind)
            .field("params", &self.inner.params)
            .field("version", &self.inner.version)
            .finish()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.inner.kind)?;
        for (i, param) in self.inner.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")@{}", self.inner.version.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::param::ParamType;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use uuid::Uuid;

    fn hash_of(key: &RequestKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn sum_key(params: Vec<i64>, version: DatasetVersion) -> RequestKey {
        RequestKey::new(
            "sum",
            &ParamSchema::Variadic(ParamType::Int),
            params.into_iter().map(Param::Int).collect(),
            version,
        )
        .unwrap()
    }

    #[test]
    fn test_structural_equality() {
        let version = DatasetVersion::initial(Uuid::now_v7());
        let a = sum_key(vec![2, 3], version);
        let b = sum_key(vec![2, 3], version);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_each_component_distinguishes() {
        let version = DatasetVersion::initial(Uuid::now_v7());
        let base = sum_key(vec![2, 3], version);

        assert_ne!(base, sum_key(vec![3, 2], version));
        assert_ne!(base, sum_key(vec![2, 3], version.next().unwrap()));
        assert_ne!(
            base,
            sum_key(vec![2, 3], DatasetVersion::initial(Uuid::now_v7()))
        );

        let other_kind = RequestKey::new(
            "product",
            &ParamSchema::Variadic(ParamType::Int),
            vec![Param::Int(2), Param::Int(3)],
            version,
        )
        .unwrap();
        assert_ne!(base, other_kind);
        assert_ne!(base.digest(), other_kind.digest());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let version = DatasetVersion::initial(Uuid::now_v7());
        let result = RequestKey::new(
            "sum",
            &ParamSchema::Variadic(ParamType::Int),
            vec![Param::Int(1), Param::from("two")],
            version,
        );
        assert!(matches!(
            result,
            Err(ResolveError::InvalidParameter { index: 1, .. })
        ));
    }

    #[test]
    fn test_encode_layout() {
        let version = DatasetVersion::new(Uuid::nil(), 9);
        let key = sum_key(vec![1], version);
        let bytes = key.encode();

        assert_eq!(&bytes[0..4], KEY_MAGIC);
        assert_eq!(&bytes[4..8], &3u32.to_be_bytes());
        assert_eq!(&bytes[8..11], b"sum");
        assert_eq!(bytes[11], SEPARATOR);
        assert_eq!(&bytes[12..28], Uuid::nil().as_bytes());
        assert_eq!(&bytes[28..36], &9u64.to_be_bytes());
        assert_eq!(&bytes[36..40], &1u32.to_be_bytes());
        assert_eq!(bytes.len(), 40 + 9);
    }

    #[test]
    fn test_display_and_short_id() {
        let version = DatasetVersion::new(Uuid::nil(), 2);
        let key = sum_key(vec![2, 3], version);
        assert_eq!(key.to_string(), "sum(2, 3)@2");
        assert_eq!(key.short_id().len(), 12);
    }

    #[test]
    fn test_query_kind_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(QueryKind::from("sum"), 1);
        assert_eq!(map.get("sum"), Some(&1));
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Keys built from equal inputs are equal, hash equally and share a digest.
        #[test]
        fn prop_equal_inputs_equal_keys(
            params in prop::collection::vec(any::<i64>(), 0..8),
            sequence in any::<u64>(),
        ) {
            let version = DatasetVersion::new(Uuid::nil(), sequence);
            let a = sum_key(params.clone(), version);
            let b = sum_key(params, version);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
            prop_assert_eq!(a.encode(), b.encode());
        }

        /// Distinct parameter lists never share an encoding.
        #[test]
        fn prop_distinct_params_distinct_encoding(
            a in prop::collection::vec(any::<i64>(), 0..6),
            b in prop::collection::vec(any::<i64>(), 0..6),
        ) {
            prop_assume!(a != b);
            let version = DatasetVersion::new(Uuid::nil(), 0);
            let key_a = sum_key(a, version);
            let key_b = sum_key(b, version);
            prop_assert_ne!(&key_a, &key_b);
            prop_assert_ne!(key_a.encode(), key_b.encode());
        }
    }
}
