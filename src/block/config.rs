// src/block/config.rs
//! Configuration for block pools

use crate::class::{LARGE_BLOCK_SIZE, MEDIUM_BLOCK_SIZE, SMALL_BLOCK_SIZE};

/// Configuration for block pool behavior.
#[derive(Debug, Clone)]
pub struct BlockPoolConfig {
    /// User-visible size of each block in the pool (bytes)
    pub block_size: usize,
    /// Number of blocks to pre-allocate at creation
    pub initial_blocks: usize,
    /// Maximum number of blocks the pool may grow to (0 = unbounded)
    pub max_blocks: usize,
}

impl Default for BlockPoolConfig {
    fn default() -> Self {
        Self {
            block_size: SMALL_BLOCK_SIZE,
            initial_blocks: 64,
            max_blocks: 0,
        }
    }
}

impl BlockPoolConfig {
    /// Configuration matching the small dispatcher class.
    pub fn small_class(initial_blocks: usize) -> Self {
        Self {
            block_size: SMALL_BLOCK_SIZE,
            initial_blocks,
            max_blocks: 0,
        }
    }

    /// Configuration matching the medium dispatcher class.
    pub fn medium_class(initial_blocks: usize) -> Self {
        Self {
            block_size: MEDIUM_BLOCK_SIZE,
            initial_blocks,
            max_blocks: 0,
        }
    }

    /// Configuration matching the large dispatcher class.
    pub fn large_class(initial_blocks: usize) -> Self {
        Self {
            block_size: LARGE_BLOCK_SIZE,
            initial_blocks,
            max_blocks: 0,
        }
    }
}
