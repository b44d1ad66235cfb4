//! The snapshot of keys the workload reads from.

use std::sync::Arc;

use crate::client::StorageClient;
use crate::error::{Error, Result};

/// An object in the target bucket, as reported by the listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// The key of the object.
    pub key: String,
    /// The size of the object in bytes.
    pub size: u64,
}

impl ObjectKey {
    /// Creates a new entry.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// An immutable, non-empty list of [`ObjectKey`]s.
///
/// The catalog is loaded once before the run and never refreshed, so it may drift from the live
/// bucket contents. Cloning is cheap and shares the underlying entries.
#[derive(Clone, Debug)]
pub struct KeyCatalog {
    entries: Arc<[ObjectKey]>,
}

impl KeyCatalog {
    /// Creates a catalog from the given entries, or `None` if there are none.
    pub fn from_entries(entries: Vec<ObjectKey>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }

        Some(Self {
            entries: entries.into(),
        })
    }

    /// Lists all objects below `prefix` and snapshots them.
    ///
    /// Returns [`Error::ListingEmpty`] if the bucket contains no matching objects.
    pub async fn load(client: &dyn StorageClient, bucket: &str, prefix: &str) -> Result<Self> {
        let entries = client
            .list_objects(prefix)
            .await
            .map_err(|cause| Error::Listing {
                bucket: bucket.to_owned(),
                cause,
            })?;

        Self::from_entries(entries).ok_or_else(|| Error::ListingEmpty {
            bucket: bucket.to_owned(),
        })
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; a catalog cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> &ObjectKey {
        &self.entries[index]
    }

    /// The first entry in listing order.
    pub fn first(&self) -> &ObjectKey {
        &self.entries[0]
    }

    /// Iterates over all entries in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectKey> {
        self.entries.iter()
    }
}
