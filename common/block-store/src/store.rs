//! Per-executor block directory.

use crate::block::FileBlock;
use crate::partition::Codec;
use floe_common::{Result, RuntimeError};
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Stores the committed blocks of one executor under a root directory.
///
/// Blocks are created for a single writer, then published here once
/// committed; readers share them through `Arc`. Deletion is the caller's
/// responsibility to sequence after all reads have finished.
pub struct FileBlockStore<K, E> {
    root_dir: PathBuf,
    codec: Arc<dyn Codec<E>>,
    blocks: RwLock<HashMap<String, Arc<FileBlock<K, E>>>>,
}

impl<K, E> FileBlockStore<K, E>
where
    K: Clone + Eq + Hash + Send + Sync,
    E: Send + Sync,
{
    pub fn new<P: AsRef<Path>>(root_dir: P, codec: Arc<dyn Codec<E>>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&root_dir)
            .map_err(|e| RuntimeError::io_with_source("failed to create block directory", e))?;
        Ok(Self {
            root_dir,
            codec,
            blocks: RwLock::new(HashMap::new()),
        })
    }

    /// Store rooted at the configured block directory.
    pub fn from_config(config: &floe_common::RuntimeConfig, codec: Arc<dyn Codec<E>>) -> Result<Self> {
        Self::new(&config.block_dir, codec)
    }

    /// Create an open block owned by the calling writer.
    pub async fn create_block(&self, block_id: &str, hash_range: u32) -> Result<FileBlock<K, E>> {
        let path = self.root_dir.join(format!("{block_id}.data"));
        debug!(block_id, ?path, "creating block");
        FileBlock::create(block_id, Arc::clone(&self.codec), path, hash_range).await
    }

    /// Make a committed block visible to readers.
    pub async fn publish(&self, block: FileBlock<K, E>) -> Result<()> {
        if !block.is_committed() {
            return Err(RuntimeError::invalid_state(format!(
                "cannot publish uncommitted block {}",
                block.id()
            )));
        }
        let mut blocks = self.blocks.write().await;
        if blocks.contains_key(block.id()) {
            return Err(RuntimeError::invalid_state(format!(
                "block {} is already published",
                block.id()
            )));
        }
        info!(block_id = %block.id(), "published block");
        blocks.insert(block.id().to_string(), Arc::new(block));
        Ok(())
    }

    /// Look up a published block.
    pub async fn get(&self, block_id: &str) -> Option<Arc<FileBlock<K, E>>> {
        self.blocks.read().await.get(block_id).cloned()
    }

    pub async fn contains(&self, block_id: &str) -> bool {
        self.blocks.read().await.contains_key(block_id)
    }

    /// Unpublish the block and delete its backing file. Removing an unknown
    /// block is a no-op.
    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        let removed = self.blocks.write().await.remove(block_id);
        if let Some(block) = removed {
            block.delete().await?;
            info!(block_id, "deleted block");
        }
        Ok(())
    }
}
