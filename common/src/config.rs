//! Runtime configuration.

use std::path::PathBuf;

/// Configuration for the runtime core.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of largest hash buckets considered skewed by the data-skew pass
    pub num_skewed_keys: usize,
    /// Notional per-attempt scheduling timeout, reported when placement fails
    pub schedule_timeout_ms: u64,
    /// Maximum number of times a task group is resubmitted after a recoverable failure
    pub max_task_group_retries: u32,
    /// Root directory for block files written by this executor
    pub block_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_skewed_keys: 10,
            schedule_timeout_ms: 10_000, // 10 seconds
            max_task_group_retries: 3,
            block_dir: PathBuf::from("/tmp/floe-blocks"),
        }
    }
}

impl RuntimeConfig {
    pub fn with_num_skewed_keys(mut self, num_skewed_keys: usize) -> Self {
        self.num_skewed_keys = num_skewed_keys;
        self
    }

    pub fn with_schedule_timeout_ms(mut self, schedule_timeout_ms: u64) -> Self {
        self.schedule_timeout_ms = schedule_timeout_ms;
        self
    }

    pub fn with_max_task_group_retries(mut self, max_task_group_retries: u32) -> Self {
        self.max_task_group_retries = max_task_group_retries;
        self
    }

    pub fn with_block_dir<P: Into<PathBuf>>(mut self, block_dir: P) -> Self {
        self.block_dir = block_dir.into();
        self
    }
}
