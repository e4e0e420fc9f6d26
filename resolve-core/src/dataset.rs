//! Dataset snapshots and their versions.
//!
//! A dataset is an immutable, externally owned source of records. Resolvers
//! only ever read it by reference. Each snapshot carries a
//! [`DatasetVersion`]; new data produces a new snapshot with a newer version
//! rather than mutating an existing one.

use crate::error::{ResolveError, ResolveResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a dataset across all of its versions.
pub type DatasetId = Uuid;

/// A point in a dataset's version history.
///
/// Versions of the same dataset are monotonically increasing and can be
/// compared to decide whether one snapshot supersedes another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetVersion {
    /// The dataset this version belongs to.
    pub dataset_id: DatasetId,
    /// Monotonically increasing sequence number. Each append increments it.
    pub sequence: u64,
}

impl DatasetVersion {
    pub fn new(dataset_id: DatasetId, sequence: u64) -> Self {
        Self {
            dataset_id,
            sequence,
        }
    }

    /// The first version of a dataset.
    pub fn initial(dataset_id: DatasetId) -> Self {
        Self::new(dataset_id, 0)
    }

    /// The version that follows this one.
    ///
    /// Fails with `VersionExhausted` once the sequence reaches `u64::MAX`.
    pub fn next(&self) -> ResolveResult<Self> {
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or_else(|| ResolveError::VersionExhausted {
                dataset: self.dataset_id.to_string(),
                sequence: self.sequence,
            })?;
        Ok(Self::new(self.dataset_id, sequence))
    }

    /// Check if this version belongs to the same dataset as `other`.
    pub fn same_dataset(&self, other: &DatasetVersion) -> bool {
        self.dataset_id == other.dataset_id
    }

    /// Check if this version is newer than another version of the same dataset.
    pub fn is_newer_than(&self, other: &DatasetVersion) -> bool {
        self.same_dataset(other) && self.sequence > other.sequence
    }

    /// Check if this version is at least as fresh as another version of the
    /// same dataset.
    pub fn is_at_least(&self, other: &DatasetVersion) -> bool {
        self.same_dataset(other) && self.sequence >= other.sequence
    }

    /// Sequence distance between two versions.
    pub fn gap(&self, other: &DatasetVersion) -> u64 {
        self.sequence.abs_diff(other.sequence)
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset_id, self.sequence)
    }
}

/// An immutable, versioned dataset snapshot.
pub trait Dataset: Send + Sync + 'static {
    /// The version of this snapshot.
    fn version(&self) -> DatasetVersion;

    /// The dataset identifier shared by all versions.
    fn id(&self) -> DatasetId {
        self.version().dataset_id
    }
}

impl<T: Dataset> Dataset for Arc<T> {
    fn version(&self) -> DatasetVersion {
        (**self).version()
    }
}

/// Append-only record log snapshot.
///
/// Records are shared between snapshots; `append` copies them into a new
/// snapshot with the next version, so an existing snapshot never observes
/// new data.
#[derive(Debug, Clone)]
pub struct RecordSnapshot<R> {
    version: DatasetVersion,
    records: Arc<[R]>,
    captured_at: DateTime<Utc>,
}

impl<R: Clone> RecordSnapshot<R> {
    /// Create the initial snapshot of a new dataset.
    pub fn new(records: Vec<R>) -> Self {
        Self::with_id(Uuid::now_v7(), records)
    }

    /// Create the initial snapshot of the dataset with the given id.
    pub fn with_id(dataset_id: DatasetId, records: Vec<R>) -> Self {
        Self {
            version: DatasetVersion::initial(dataset_id),
            records: records.into(),
            captured_at: Utc::now(),
        }
    }

    /// Produce the next snapshot containing these records plus `more`.
    pub fn append(&self, more: impl IntoIterator<Item = R>) -> ResolveResult<Self> {
        let version = self.version.next()?;
        let records: Vec<R> = self.records.iter().cloned().chain(more).collect();
        Ok(Self {
            version,
            records: records.into(),
            captured_at: Utc::now(),
        })
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// When this snapshot was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl<R: Send + Sync + 'static> Dataset for RecordSnapshot<R> {
    fn version(&self) -> DatasetVersion {
        self.version
    }
}
