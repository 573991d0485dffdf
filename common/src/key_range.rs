//! Hash-key ranges for shuffle distributions.
//!
//! A shuffle edge hashes user keys into `hash_range` buckets; each downstream
//! task reads one contiguous `[begin, end)` slice of that bucket space. The
//! same bucketing function is used by the data-skew planner and by block
//! reads, so partial-range reads and observed size metrics always agree on
//! which bucket a key belongs to.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// The hash bucket a key falls into, for a bucket space of `hash_range`.
pub fn bucket_of<K: Hash>(key: &K, hash_range: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % hash_range as u64) as u32
}

/// A contiguous range `[begin, end)` of hash buckets assigned to one
/// downstream task, tagged hot when it contains a skewed bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct HashRange {
    begin: u32,
    end: u32,
    is_hot: bool,
}

impl HashRange {
    pub fn of(begin: u32, end: u32, is_hot: bool) -> Self {
        debug_assert!(begin <= end, "range begin must not exceed end");
        Self { begin, end, is_hot }
    }

    /// The full bucket space `[0, hash_range)`.
    pub fn all(hash_range: u32) -> Self {
        Self::of(0, hash_range, false)
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn is_hot(&self) -> bool {
        self.is_hot
    }

    pub fn length(&self) -> u32 {
        self.end - self.begin
    }

    /// Whether the given bucket falls inside this range.
    pub fn includes(&self, bucket: u32) -> bool {
        bucket >= self.begin && bucket < self.end
    }

    /// Whether `key`'s bucket (for a bucket space of `hash_range`) falls
    /// inside this range.
    pub fn includes_key<K: Hash>(&self, key: &K, hash_range: u32) -> bool {
        self.includes(bucket_of(key, hash_range))
    }
}

impl std::fmt::Display for HashRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}){}",
            self.begin,
            self.end,
            if self.is_hot { " hot" } else { "" }
        )
    }
}
