// src/cache/config.rs
//! Configuration for the per-thread cache tiers.

use tracing::warn;

/// Hook invoked on a block as it enters or leaves an object cache.
pub type ObjectHook = fn(*mut u8);

/// Operations between adaptive re-tunings of a cache.
pub(crate) const ADJUSTMENT_INTERVAL: u64 = 256;

/// Blocks drained per batch when a cache shrinks or flushes.
pub(crate) const FLUSH_BATCH: usize = 8;

/// Configuration for the per-thread block cache.
#[derive(Debug, Clone)]
pub struct ThreadCacheConfig {
    /// Entries cached for the small class
    pub small_cache_size: usize,
    /// Entries cached for the medium class
    pub medium_cache_size: usize,
    /// Entries cached for the large class
    pub large_cache_size: usize,
    /// Re-tune per-class capacities from the observed hit ratio
    pub adaptive_sizing: bool,
    /// Hit ratio above which a class capacity doubles (0.0-1.0)
    pub growth_threshold: f64,
    /// Hit ratio below which a class capacity halves (0.0-1.0)
    pub shrink_threshold: f64,
    /// Lower bound for adaptive capacities
    pub min_cache_size: usize,
    /// Upper bound for adaptive capacities
    pub max_cache_size: usize,
}

impl Default for ThreadCacheConfig {
    fn default() -> Self {
        Self {
            small_cache_size: 64,
            medium_cache_size: 32,
            large_cache_size: 16,
            adaptive_sizing: true,
            growth_threshold: 0.80,
            shrink_threshold: 0.20,
            min_cache_size: 8,
            max_cache_size: 256,
        }
    }
}

impl ThreadCacheConfig {
    /// Clamps every field into its legal range, warning on each adjustment.
    pub(crate) fn sanitized(mut self) -> Self {
        self.growth_threshold = clamp_threshold("growth_threshold", self.growth_threshold);
        self.shrink_threshold = clamp_threshold("shrink_threshold", self.shrink_threshold);
        if self.min_cache_size > self.max_cache_size {
            warn!(
                min = self.min_cache_size,
                max = self.max_cache_size,
                "min_cache_size exceeds max_cache_size; clamping"
            );
            self.min_cache_size = self.max_cache_size;
        }
        self.small_cache_size = clamp_capacity(
            "small_cache_size",
            self.small_cache_size,
            self.min_cache_size,
            self.max_cache_size,
        );
        self.medium_cache_size = clamp_capacity(
            "medium_cache_size",
            self.medium_cache_size,
            self.min_cache_size,
            self.max_cache_size,
        );
        self.large_cache_size = clamp_capacity(
            "large_cache_size",
            self.large_cache_size,
            self.min_cache_size,
            self.max_cache_size,
        );
        self
    }
}

/// Configuration for one kind slot of the per-thread object cache.
#[derive(Debug, Clone, Default)]
pub struct ObjectCacheConfig {
    /// Entries cached for the kind (0 = keep the current capacity)
    pub max_size: usize,
    /// Re-tune the capacity from the observed hit ratio
    pub adaptive_sizing: bool,
    /// Hit ratio above which the capacity doubles (0.0-1.0)
    pub growth_threshold: f64,
    /// Hit ratio below which the capacity halves (0.0-1.0)
    pub shrink_threshold: f64,
    /// Lower bound for the adaptive capacity
    pub min_cache_size: usize,
    /// Upper bound for the adaptive capacity
    pub max_cache_size: usize,
    /// Invoked on every pointer leaving `alloc` for this kind
    pub constructor: Option<ObjectHook>,
    /// Invoked on every pointer entering `free` for this kind
    pub destructor: Option<ObjectHook>,
}

impl ObjectCacheConfig {
    /// Sizing defaults matching the thread cache.
    pub fn sized(max_size: usize) -> Self {
        Self {
            max_size,
            adaptive_sizing: true,
            growth_threshold: 0.80,
            shrink_threshold: 0.20,
            min_cache_size: 8,
            max_cache_size: 256,
            constructor: None,
            destructor: None,
        }
    }

    pub(crate) fn sanitized(mut self) -> Self {
        self.growth_threshold = clamp_threshold("growth_threshold", self.growth_threshold);
        self.shrink_threshold = clamp_threshold("shrink_threshold", self.shrink_threshold);
        if self.min_cache_size > self.max_cache_size {
            warn!(
                min = self.min_cache_size,
                max = self.max_cache_size,
                "min_cache_size exceeds max_cache_size; clamping"
            );
            self.min_cache_size = self.max_cache_size;
        }
        if self.max_size > 0 {
            self.max_size = clamp_capacity(
                "max_size",
                self.max_size,
                self.min_cache_size,
                self.max_cache_size,
            );
        }
        self
    }
}

fn clamp_threshold(field: &str, value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        return value;
    }
    let clamped = value.clamp(0.0, 1.0);
    warn!(field, value, clamped, "threshold outside 0..=1; clamping");
    clamped
}

fn clamp_capacity(field: &str, value: usize, min: usize, max: usize) -> usize {
    if value >= min && value <= max {
        return value;
    }
    let clamped = value.clamp(min, max);
    warn!(field, value, clamped, "capacity outside configured bounds; clamping");
    clamped
}
