//! File-backed blocks.
//!
//! Concurrent reads of a committed block are supported; concurrent writes are
//! not. Single-writer access is enforced by construction: the producing task
//! owns the `FileBlock` by value and all write paths take `&mut self`, so a
//! block only becomes shareable once it has been committed and published to
//! the store.

use crate::file_area::FileArea;
use crate::metadata::{BlockMetadata, PartitionMetadata};
use crate::partition::{Codec, NonSerializedPartition, SerializedPartition};
use floe_common::{HashRange, Result, RuntimeError};
use std::collections::HashMap;
use std::hash::Hash;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::debug;

const ALREADY_COMMITTED: &str = "the block is already committed";
const NOT_YET_COMMITTED: &str = "cannot retrieve partitions before the block is committed";

/// A block stored in a local file.
///
/// Partition payloads are appended to the file in write order with no in-file
/// header; the in-memory [`BlockMetadata`] records where each partition
/// lives. `hash_range` is the bucket count of the shuffle edge this block
/// belongs to and fixes how keys are mapped to buckets for range reads.
pub struct FileBlock<K, E> {
    id: String,
    codec: Arc<dyn Codec<E>>,
    path: PathBuf,
    hash_range: u32,
    metadata: BlockMetadata<K>,
    buffered: Vec<SerializedPartition<K>>,
    buffer_index: HashMap<K, usize>,
}

impl<K, E> FileBlock<K, E>
where
    K: Clone + Eq + Hash + Send + Sync,
    E: Send + Sync,
{
    /// Create an open block backed by a fresh file at `path`.
    pub async fn create<P: AsRef<Path>>(
        id: impl Into<String>,
        codec: Arc<dyn Codec<E>>,
        path: P,
        hash_range: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        File::create(&path)
            .await
            .map_err(|e| RuntimeError::block_write_with_source("failed to create block file", e))?;
        Ok(Self {
            id: id.into(),
            codec,
            path,
            hash_range,
            metadata: BlockMetadata::new(),
            buffered: Vec::new(),
            buffer_index: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash_range(&self) -> u32 {
        self.hash_range
    }

    pub fn is_committed(&self) -> bool {
        self.metadata.is_committed()
    }

    /// Buffer a single element into the in-memory partition for `key`.
    pub fn write(&mut self, key: K, element: &E) -> Result<()> {
        if self.is_committed() {
            return Err(RuntimeError::block_write(ALREADY_COMMITTED));
        }
        let index = match self.buffer_index.get(&key) {
            Some(index) => *index,
            None => {
                self.buffered.push(SerializedPartition::empty(key.clone()));
                self.buffer_index.insert(key, self.buffered.len() - 1);
                self.buffered.len() - 1
            }
        };
        self.buffered[index].append(self.codec.as_ref(), element)
    }

    /// Serialize the given partitions and append them to the file immediately.
    pub async fn write_partitions<I>(&mut self, partitions: I) -> Result<()>
    where
        I: IntoIterator<Item = NonSerializedPartition<K, E>>,
    {
        if self.is_committed() {
            return Err(RuntimeError::block_write(ALREADY_COMMITTED));
        }
        let mut serialized = Vec::new();
        for partition in partitions {
            serialized.push(partition.serialize(self.codec.as_ref())?);
        }
        self.append_to_file(serialized).await
    }

    /// Append already-serialized partitions to the file immediately.
    pub async fn write_serialized_partitions<I>(&mut self, partitions: I) -> Result<()>
    where
        I: IntoIterator<Item = SerializedPartition<K>>,
    {
        if self.is_committed() {
            return Err(RuntimeError::block_write(ALREADY_COMMITTED));
        }
        self.append_to_file(partitions.into_iter().collect()).await
    }

    /// Flush partitions buffered by [`write`](Self::write) to the file, in
    /// insertion order, and clear the buffer.
    pub async fn commit_partitions(&mut self) -> Result<()> {
        let buffered = std::mem::take(&mut self.buffered);
        self.buffer_index.clear();
        self.append_to_file(buffered).await
    }

    /// Seal the block. Flushes any buffered partitions, then returns the
    /// total stored bytes per key. Calling `commit` on a committed block is a
    /// no-op returning the same map.
    pub async fn commit(&mut self) -> Result<HashMap<K, u64>> {
        if !self.is_committed() {
            self.commit_partitions().await?;
            self.metadata.commit();
            debug!(
                block_id = %self.id,
                partitions = self.metadata.partitions().len(),
                bytes = self.metadata.size_bytes(),
                "committed block"
            );
        }
        let mut sizes: HashMap<K, u64> = HashMap::new();
        for partition in self.metadata.partitions() {
            *sizes.entry(partition.key().clone()).or_insert(0) += partition.length() as u64;
        }
        Ok(sizes)
    }

    async fn append_to_file(&mut self, partitions: Vec<SerializedPartition<K>>) -> Result<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| RuntimeError::block_write_with_source("failed to open block file", e))?;
        for partition in partitions {
            self.metadata.reserve_partition(
                partition.key().clone(),
                partition.length(),
                partition.element_count(),
            );
            file.write_all(partition.bytes())
                .await
                .map_err(|e| RuntimeError::block_write_with_source("failed to append partition", e))?;
        }
        file.flush()
            .await
            .map_err(|e| RuntimeError::block_write_with_source("failed to flush block file", e))
    }

    /// Stream the serialized partitions whose key hashes into `range`.
    ///
    /// Each call opens an independent file handle, so any number of readers
    /// may stream the same committed block concurrently.
    pub async fn read_serialized_partitions(
        &self,
        range: HashRange,
    ) -> Result<SerializedPartitionStream<K>> {
        if !self.is_committed() {
            return Err(RuntimeError::block_fetch(NOT_YET_COMMITTED));
        }
        let file = File::open(&self.path)
            .await
            .map_err(|e| RuntimeError::block_fetch_with_source("failed to open block file", e))?;
        Ok(SerializedPartitionStream {
            reader: BufReader::new(file),
            partitions: self.metadata.partitions().to_vec().into_iter(),
            range,
            hash_range: self.hash_range,
        })
    }

    /// Stream the deserialized partitions whose key hashes into `range`.
    pub async fn read_partitions(&self, range: HashRange) -> Result<PartitionStream<K, E>> {
        Ok(PartitionStream {
            inner: self.read_serialized_partitions(range).await?,
            codec: Arc::clone(&self.codec),
        })
    }

    /// Byte-range descriptors for the partitions whose key hashes into
    /// `range`, for zero-copy forwarding.
    pub fn as_file_areas(&self, range: HashRange) -> Result<Vec<FileArea>> {
        if !self.is_committed() {
            return Err(RuntimeError::block_fetch(NOT_YET_COMMITTED));
        }
        Ok(self
            .metadata
            .partitions()
            .iter()
            .filter(|p| range.includes_key(p.key(), self.hash_range))
            .map(|p| FileArea::new(self.path.clone(), p.offset(), p.length() as u64))
            .collect())
    }

    /// Remove the backing file. Must only be called once every outstanding
    /// reader has finished.
    pub async fn delete(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| RuntimeError::io_with_source("failed to stat block file", e))?
        {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| RuntimeError::io_with_source("failed to delete block file", e))?;
        }
        Ok(())
    }
}

/// Lazy reader over the serialized partitions of one committed block.
///
/// The stream exclusively owns its file handle and closes it on drop.
/// Excluded partitions are skipped by seeking exactly their recorded length.
pub struct SerializedPartitionStream<K> {
    reader: BufReader<File>,
    partitions: std::vec::IntoIter<PartitionMetadata<K>>,
    range: HashRange,
    hash_range: u32,
}

impl<K> SerializedPartitionStream<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    /// The next in-range partition, or `None` when the block is exhausted.
    pub async fn next(&mut self) -> Result<Option<SerializedPartition<K>>> {
        for metadata in self.partitions.by_ref() {
            if self.range.includes_key(metadata.key(), self.hash_range) {
                let mut bytes = vec![0u8; metadata.length() as usize];
                self.reader.read_exact(&mut bytes).await.map_err(|e| {
                    RuntimeError::block_fetch_with_source(
                        "short read: partition payload ended before its recorded length",
                        e,
                    )
                })?;
                return Ok(Some(SerializedPartition::new(
                    metadata.key().clone(),
                    bytes,
                    metadata.element_count(),
                )));
            }
            self.reader
                .seek(SeekFrom::Current(metadata.length() as i64))
                .await
                .map_err(|e| {
                    RuntimeError::block_fetch_with_source("failed to seek past partition", e)
                })?;
        }
        Ok(None)
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<SerializedPartition<K>>> {
        let mut partitions = Vec::new();
        while let Some(partition) = self.next().await? {
            partitions.push(partition);
        }
        Ok(partitions)
    }
}

/// Lazy reader yielding deserialized partitions.
pub struct PartitionStream<K, E> {
    inner: SerializedPartitionStream<K>,
    codec: Arc<dyn Codec<E>>,
}

impl<K, E> PartitionStream<K, E>
where
    K: Clone + Eq + Hash + Send + Sync,
    E: Send + Sync,
{
    /// The next in-range partition, or `None` when the block is exhausted.
    pub async fn next(&mut self) -> Result<Option<NonSerializedPartition<K, E>>> {
        match self.inner.next().await? {
            Some(partition) => Ok(Some(partition.deserialize(self.codec.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<NonSerializedPartition<K, E>>> {
        let mut partitions = Vec::new();
        while let Some(partition) = self.next().await? {
            partitions.push(partition);
        }
        Ok(partitions)
    }
}
