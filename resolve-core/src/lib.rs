//! Resolve Core - Request Identity and Shared Types
//!
//! Pure data types shared by the cache and the engine: query parameters and
//! schemas, request keys, dataset versions, dependency tags, configuration
//! and errors. This crate contains no resolution logic.

use sha2::{Digest, Sha256};

pub mod config;
pub mod dataset;
pub mod error;
pub mod key;
pub mod param;
pub mod tag;

pub use config::ResolveConfig;
pub use dataset::{Dataset, DatasetId, DatasetVersion, RecordSnapshot};
pub use error::{ConfigError, ResolveError, ResolveResult};
pub use key::{QueryKind, RequestKey};
pub use param::{params_from_json, Param, ParamSchema, ParamType};
pub use tag::DependencyTag;

/// SHA-256 content hash used to address request keys.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
