//! Batch execution configuration.

use std::path::PathBuf;

/// Default chunk size used when staging attachment streams.
pub const DEFAULT_STAGE_CHUNK_SIZE: usize = 64 * 1024;

/// Default capacity of the transaction merger queue.
pub const DEFAULT_MERGER_QUEUE_SIZE: usize = 1024;

/// Default number of queued batches the merger runs per wake.
pub const DEFAULT_MAX_COALESCED: usize = 32;

/// Configuration for batch execution.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory for staged attachment files.
    pub temp_dir: PathBuf,
    /// Read buffer size when staging attachments.
    pub stage_chunk_size: usize,
    /// Capacity of the merger submission queue.
    pub merger_queue_size: usize,
    /// Maximum queued batches executed per merger wake.
    pub max_coalesced: usize,
}

impl BatchConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            stage_chunk_size: DEFAULT_STAGE_CHUNK_SIZE,
            merger_queue_size: DEFAULT_MERGER_QUEUE_SIZE,
            max_coalesced: DEFAULT_MAX_COALESCED,
        }
    }

    /// Sets the staging directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets the staging chunk size. Zero is raised to one byte.
    #[must_use]
    pub fn with_stage_chunk_size(mut self, size: usize) -> Self {
        self.stage_chunk_size = size.max(1);
        self
    }

    /// Sets the merger queue capacity. Zero is raised to one.
    #[must_use]
    pub fn with_merger_queue_size(mut self, size: usize) -> Self {
        self.merger_queue_size = size.max(1);
        self
    }

    /// Sets how many queued batches run per merger wake. Zero is raised to one.
    #[must_use]
    pub fn with_max_coalesced(mut self, count: usize) -> Self {
        self.max_coalesced = count.max(1);
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new()
    }
}
