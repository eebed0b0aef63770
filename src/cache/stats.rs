// src/cache/stats.rs
//! Statistics snapshots for the per-thread cache tiers.

use crate::cache::object::NUM_OBJECT_KINDS;

/// Point-in-time statistics for the calling thread's block cache.
#[derive(Debug, Clone)]
pub struct ThreadCacheStats {
    /// Diagnostic identifier of the owning thread
    pub thread_id: String,
    /// Allocations served from any class stack
    pub hits: u64,
    /// Small-class requests that fell through to the dispatcher
    pub miss_small: u64,
    /// Medium-class requests that fell through to the dispatcher
    pub miss_medium: u64,
    /// Large-class requests that fell through to the dispatcher
    pub miss_large: u64,
    /// Oversize requests (always dispatcher-served)
    pub miss_oversize: u64,
    /// Number of completed flushes
    pub flushes: u64,
    /// Blocks currently cached per class
    pub counts: [usize; 3],
    /// Current per-class capacity
    pub max_sizes: [usize; 3],
}

impl ThreadCacheStats {
    /// Total requests that fell through to the dispatcher.
    pub fn misses(&self) -> u64 {
        self.miss_small + self.miss_medium + self.miss_large + self.miss_oversize
    }

    /// Overall hit ratio (0.0-1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Point-in-time statistics for the calling thread's object cache.
#[derive(Debug, Clone)]
pub struct ObjectCacheStats {
    /// Diagnostic identifier of the owning thread
    pub thread_id: String,
    /// Allocations served from any kind stack
    pub hits: u64,
    /// Per-kind requests that fell through to the dispatcher
    pub misses: [u64; NUM_OBJECT_KINDS],
    /// Number of completed flushes
    pub flushes: u64,
    /// Objects currently cached per kind
    pub counts: [usize; NUM_OBJECT_KINDS],
    /// Current per-kind capacity
    pub max_sizes: [usize; NUM_OBJECT_KINDS],
}

impl ObjectCacheStats {
    /// Total requests that fell through to the dispatcher.
    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    /// Overall hit ratio (0.0-1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.total_misses();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
