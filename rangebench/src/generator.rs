//! Selection of the key and byte range read by each request.
//!
//! Keys are drawn uniformly from the [`KeyCatalog`] with replacement. When range reads are enabled,
//! a [`RangeSpec`] either reads the head of the object, or a window at a uniformly random offset.
//!
//! All range arithmetic uses an *assumed* object size. By default ([`SizeSource::Representative`])
//! this is the size of the first catalog entry, applied to every key regardless of its real size.
//! Keys smaller than that may then receive ranges they cannot satisfy, which the storage service
//! rejects like any other failed request.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::{KeyCatalog, ObjectKey};

/// An inclusive range of bytes within an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Offset of the first byte.
    pub start: u64,
    /// Offset of the last byte, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Creates a range from `start` to `end`, both inclusive.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for ByteRange {
    /// Formats the range as the value of an HTTP `Range` header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Where the object size for range arithmetic comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    /// Use the size of the first catalog entry for every key.
    #[default]
    Representative,
    /// Use the size of the selected key.
    PerKey,
}

/// How ranges are placed within an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    /// Number of bytes to read.
    pub length: u64,
    /// Read at a random offset instead of the head of the object.
    pub random_offset: bool,
}

impl RangeSpec {
    /// Computes the range to read from an object of `object_size` bytes.
    ///
    /// Without random offsets this is always `bytes=0-<length>`, independent of the object. With
    /// random offsets, the start is drawn uniformly from `[0, object_size - length - 1]` and the
    /// range covers exactly `length` bytes. If the object leaves no room for such a window, the
    /// range starts at zero.
    pub fn compute<R: Rng + ?Sized>(&self, object_size: u64, rng: &mut R) -> ByteRange {
        if !self.random_offset {
            return ByteRange::new(0, self.length);
        }

        let max_start = object_size
            .checked_sub(self.length)
            .and_then(|room| room.checked_sub(1));
        let start = match max_start {
            Some(max_start) => rng.random_range(0..=max_start),
            None => 0,
        };

        ByteRange::new(start, start + self.length.saturating_sub(1))
    }

    /// Returns `true` if random windows fit into objects of `object_size` bytes.
    pub fn fits(&self, object_size: u64) -> bool {
        !self.random_offset || object_size > self.length
    }
}

/// A single read to issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetRequest<'a> {
    /// The object to read.
    pub object: &'a ObjectKey,
    /// The range to read, or `None` for the whole object.
    pub range: Option<ByteRange>,
}

/// Produces the next [`GetRequest`] for a worker unit.
///
/// The generator holds no mutable state; randomness comes from the caller's RNG so that every
/// unit draws independently.
#[derive(Clone, Copy, Debug)]
pub struct RequestGenerator {
    range: Option<RangeSpec>,
    size_source: SizeSource,
    assumed_size: u64,
}

impl RequestGenerator {
    /// Creates a generator. `assumed_size` is used when `size_source` is
    /// [`SizeSource::Representative`].
    pub fn new(range: Option<RangeSpec>, size_source: SizeSource, assumed_size: u64) -> Self {
        Self {
            range,
            size_source,
            assumed_size,
        }
    }

    /// Draws a key uniformly at random, with replacement.
    pub fn select_key<'a, R: Rng + ?Sized>(
        &self,
        catalog: &'a KeyCatalog,
        rng: &mut R,
    ) -> &'a ObjectKey {
        catalog.get(rng.random_range(0..catalog.len()))
    }

    /// Computes the range for `object`, or `None` if range reads are disabled.
    pub fn compute_range<R: Rng + ?Sized>(
        &self,
        object: &ObjectKey,
        rng: &mut R,
    ) -> Option<ByteRange> {
        let spec = self.range?;
        let size = match self.size_source {
            SizeSource::Representative => self.assumed_size,
            SizeSource::PerKey => object.size,
        };
        Some(spec.compute(size, rng))
    }

    /// Produces the next request.
    pub fn next_request<'a, R: Rng + ?Sized>(
        &self,
        catalog: &'a KeyCatalog,
        rng: &mut R,
    ) -> GetRequest<'a> {
        let object = self.select_key(catalog, rng);
        let range = self.compute_range(object, rng);
        GetRequest { object, range }
    }
}
