//! Block metadata: the ordered partition directory of a block file.

/// Location of one partition inside a block file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata<K> {
    key: K,
    offset: u64,
    length: u32,
    element_count: u32,
}

impl<K> PartitionMetadata<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }
}

/// Ordered list of partition records for one block, sealed at commit.
///
/// Offsets are derived, never stored: each partition starts where the
/// previous one ended.
#[derive(Debug, Clone)]
pub struct BlockMetadata<K> {
    partitions: Vec<PartitionMetadata<K>>,
    position: u64,
    committed: bool,
}

impl<K> BlockMetadata<K> {
    pub fn new() -> Self {
        Self {
            partitions: Vec::new(),
            position: 0,
            committed: false,
        }
    }

    /// Record a partition about to be appended to the file, assigning it the
    /// next write offset.
    pub fn reserve_partition(&mut self, key: K, length: u32, element_count: u32) {
        debug_assert!(!self.committed, "reserve on a committed block");
        self.partitions.push(PartitionMetadata {
            key,
            offset: self.position,
            length,
            element_count,
        });
        self.position += length as u64;
    }

    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn partitions(&self) -> &[PartitionMetadata<K>] {
        &self.partitions
    }

    /// Total bytes recorded so far.
    pub fn size_bytes(&self) -> u64 {
        self.position
    }
}

impl<K> Default for BlockMetadata<K> {
    fn default() -> Self {
        Self::new()
    }
}
