//! Execution properties carried by stages and stage edges.

use bincode::{Decode, Encode};
use floe_common::HashRange;
use serde::{Deserialize, Serialize};

/// Coarse executor class a task group may be constrained to.
///
/// `None` is the sentinel for "any container". Variant order is the stable
/// iteration order used when a task group accepts any container type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum ContainerType {
    None,
    Compute,
    Transient,
    Reserved,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::None => "None",
            ContainerType::Compute => "Compute",
            ContainerType::Transient => "Transient",
            ContainerType::Reserved => "Reserved",
        }
    }

    /// All concrete container types, in stable order, excluding the sentinel.
    pub fn concrete_types() -> [ContainerType; 3] {
        [
            ContainerType::Compute,
            ContainerType::Transient,
            ContainerType::Reserved,
        ]
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How data moves across a stage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum DataCommunicationPattern {
    OneToOne,
    Broadcast,
    Shuffle,
}

/// How elements are assigned to output partitions on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum PartitionerType {
    Hash,
    SkewHash,
    Intact,
}

/// The key-range assignment of a shuffle edge: a bucket space of
/// `hash_range` buckets, split into one contiguous range per downstream task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ShuffleDistribution {
    hash_range: u32,
    ranges: Vec<HashRange>,
}

impl ShuffleDistribution {
    pub fn new(hash_range: u32, ranges: Vec<HashRange>) -> Self {
        Self { hash_range, ranges }
    }

    pub fn hash_range(&self) -> u32 {
        self.hash_range
    }

    pub fn ranges(&self) -> &[HashRange] {
        &self.ranges
    }

    pub fn dst_parallelism(&self) -> usize {
        self.ranges.len()
    }

    /// The range assigned to downstream task `idx`.
    pub fn range_for(&self, idx: usize) -> Option<HashRange> {
        self.ranges.get(idx).copied()
    }
}
