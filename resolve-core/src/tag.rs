//! Dependency tags used for invalidation lookup.

use crate::dataset::DatasetId;
use crate::key::RequestKey;
use std::fmt;

/// Something a cached result was derived from.
///
/// Tags are only ever used to find entries to invalidate; they never own or
/// keep alive the thing they name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyTag {
    /// Every version of a dataset.
    Dataset(DatasetId),
    /// A named region of a dataset, e.g. a capture range or a table.
    Region { dataset: DatasetId, region: String },
    /// Another cache entry.
    Entry(RequestKey),
}

impl DependencyTag {
    pub fn region(dataset: DatasetId, region: impl Into<String>) -> Self {
        Self::Region {
            dataset,
            region: region.into(),
        }
    }

    pub fn entry(key: &RequestKey) -> Self {
        Self::Entry(key.clone())
    }

    /// The dataset this tag refers to.
    pub fn dataset_id(&self) -> DatasetId {
        match self {
            Self::Dataset(id) => *id,
            Self::Region { dataset, .. } => *dataset,
            Self::Entry(key) => key.dataset_id(),
        }
    }

    /// The entry this tag names, if it is an `Entry` tag.
    pub fn as_entry(&self) -> Option<&RequestKey> {
        match self {
            Self::Entry(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset(id) => write!(f, "dataset:{}", id),
            Self::Region { dataset, region } => write!(f, "region:{}/{}", dataset, region),
            Self::Entry(key) => write!(f, "entry:{}", key),
        }
    }
}
