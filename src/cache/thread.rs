// src/cache/thread.rs
//! Per-thread block cache: three LIFO stacks, one per pooled size class.
//!
//! # Architecture
//!
//! Allocation follows a two-tier cascade:
//!
//! 1. **Thread-local stack** (no synchronization, no locks)
//! 2. **Dispatcher** (pool mutex, or fallback heap)
//!
//! The cache is created by [`init`] (or lazily bypassed: an uninitialized
//! thread falls straight through to the dispatcher, which always works).
//! The dispatcher never calls back up into this module.
//!
//! # Thread exit
//!
//! A thread must call [`flush`] (or [`cleanup`]) before exiting; blocks
//! still cached when the thread dies are leaked. There is deliberately no
//! TLS-destructor flush: at TLS-teardown time the dispatcher's pools may
//! already be gone, and pushing blocks into destroyed pools is worse than
//! the documented leak.
//!
//! # Adaptive sizing
//!
//! Every `ADJUSTMENT_INTERVAL` operations the cache re-tunes each class
//! capacity from its hit ratio: doubling above the growth threshold,
//! halving (and draining the excess in small batches) below the shrink
//! threshold. The hit counter is shared across the three classes, so the
//! per-class ratio is an overestimate; callers wanting exact per-class
//! ratios must add per-class hit counters.

use crate::cache::config::{ADJUSTMENT_INTERVAL, FLUSH_BATCH, ThreadCacheConfig};
use crate::cache::stats::ThreadCacheStats;
use crate::class::{NUM_POOLED_CLASSES, SizeClass};
use crate::error::Result;
use crate::global;
use std::cell::RefCell;

thread_local! {
    static CACHE: RefCell<Option<ThreadCache>> = const { RefCell::new(None) };
}

/// One LIFO stack of recycled blocks for a single size class.
struct ClassStack {
    blocks: Vec<*mut u8>,
    max_size: usize,
}

impl ClassStack {
    fn new(max_size: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Drains blocks above `target` to the dispatcher, a batch at a time.
    fn drain_to(&mut self, target: usize) {
        while self.blocks.len() > target {
            let batch = (self.blocks.len() - target).min(FLUSH_BATCH);
            for _ in 0..batch {
                if let Some(ptr) = self.blocks.pop() {
                    unsafe { global::free(ptr) };
                }
            }
        }
    }
}

struct ThreadCache {
    stacks: [ClassStack; NUM_POOLED_CLASSES],
    adaptive_sizing: bool,
    growth_threshold: f64,
    shrink_threshold: f64,
    min_cache_size: usize,
    max_cache_size: usize,
    /// Shared across classes (see the module docs on adaptive sizing).
    hits: u64,
    misses: [u64; NUM_POOLED_CLASSES + 1],
    flushes: u64,
    operations_since_adjustment: u64,
    thread_id: String,
}

impl ThreadCache {
    fn new(config: ThreadCacheConfig) -> Self {
        let config = config.sanitized();
        Self {
            stacks: [
                ClassStack::new(config.small_cache_size),
                ClassStack::new(config.medium_cache_size),
                ClassStack::new(config.large_cache_size),
            ],
            adaptive_sizing: config.adaptive_sizing,
            growth_threshold: config.growth_threshold,
            shrink_threshold: config.shrink_threshold,
            min_cache_size: config.min_cache_size,
            max_cache_size: config.max_cache_size,
            hits: 0,
            misses: [0; NUM_POOLED_CLASSES + 1],
            flushes: 0,
            operations_since_adjustment: 0,
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }

    fn reconfigure(&mut self, config: ThreadCacheConfig) {
        let config = config.sanitized();
        self.adaptive_sizing = config.adaptive_sizing;
        self.growth_threshold = config.growth_threshold;
        self.shrink_threshold = config.shrink_threshold;
        self.min_cache_size = config.min_cache_size;
        self.max_cache_size = config.max_cache_size;
        let sizes = [
            config.small_cache_size,
            config.medium_cache_size,
            config.large_cache_size,
        ];
        for (stack, size) in self.stacks.iter_mut().zip(sizes) {
            stack.max_size = size;
            stack.drain_to(size);
        }
    }

    fn alloc(&mut self, size: usize) -> *mut u8 {
        self.operations_since_adjustment += 1;
        let class = SizeClass::for_size(size);
        if class != SizeClass::Oversize {
            if let Some(ptr) = self.stacks[class.index()].blocks.pop() {
                self.hits += 1;
                return ptr;
            }
        }
        self.misses[class.index()] += 1;
        self.maybe_adjust();
        global::alloc(size)
    }

    /// # Safety
    ///
    /// `ptr` must be a live pointer issued by this crate's allocation paths.
    unsafe fn free(&mut self, ptr: *mut u8, size_hint: usize) {
        let size = if size_hint != 0 {
            size_hint
        } else {
            unsafe { global::block_size_for(ptr) }
        };
        if size == 0 {
            // No header and no hint: a heap-issued block. Straight down.
            unsafe { global::free(ptr) };
            return;
        }
        let class = SizeClass::for_size(size);
        if class != SizeClass::Oversize {
            let stack = &mut self.stacks[class.index()];
            if stack.blocks.len() < stack.max_size {
                stack.blocks.push(ptr);
                return;
            }
        }
        unsafe { global::free(ptr) };
        self.maybe_adjust();
    }

    fn flush(&mut self) {
        if self.stacks.iter().all(|s| s.blocks.is_empty()) {
            return;
        }
        for stack in &mut self.stacks {
            stack.drain_to(0);
        }
        self.flushes += 1;
    }

    fn maybe_adjust(&mut self) {
        if self.adaptive_sizing && self.operations_since_adjustment >= ADJUSTMENT_INTERVAL {
            self.adjust_size();
        }
    }

    fn adjust_size(&mut self) {
        for idx in 0..NUM_POOLED_CLASSES {
            let denom = self.hits + self.misses[idx];
            if denom == 0 {
                continue;
            }
            let ratio = self.hits as f64 / denom as f64;
            let stack = &mut self.stacks[idx];
            if ratio > self.growth_threshold {
                stack.max_size = (stack.max_size * 2).min(self.max_cache_size);
            } else if ratio < self.shrink_threshold {
                stack.max_size = (stack.max_size / 2).max(self.min_cache_size);
                let target = stack.max_size;
                stack.drain_to(target);
            }
        }
        self.operations_since_adjustment = 0;
    }

    fn stats(&self) -> ThreadCacheStats {
        ThreadCacheStats {
            thread_id: self.thread_id.clone(),
            hits: self.hits,
            miss_small: self.misses[0],
            miss_medium: self.misses[1],
            miss_large: self.misses[2],
            miss_oversize: self.misses[NUM_POOLED_CLASSES],
            flushes: self.flushes,
            counts: std::array::from_fn(|i| self.stacks[i].blocks.len()),
            max_sizes: std::array::from_fn(|i| self.stacks[i].max_size),
        }
    }
}

/// Initializes the calling thread's cache with default configuration.
///
/// Idempotent: an existing cache is left as is.
pub fn init() -> Result<()> {
    with_cache(|slot| {
        if slot.is_none() {
            *slot = Some(ThreadCache::new(ThreadCacheConfig::default()));
        }
        Ok(())
    })
}

/// Initializes or re-configures the calling thread's cache.
///
/// A second call applies the new configuration to the existing cache,
/// draining any blocks above the new per-class capacities.
pub fn init_with_config(config: ThreadCacheConfig) -> Result<()> {
    with_cache(|slot| {
        match slot.as_mut() {
            Some(cache) => cache.reconfigure(config),
            None => *slot = Some(ThreadCache::new(config)),
        }
        Ok(())
    })
}

/// Flushes and tears down the calling thread's cache.
///
/// Call before thread exit; afterwards allocations fall through to the
/// dispatcher until [`init`] runs again.
pub fn cleanup() {
    let _ = CACHE.try_with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(cache) = slot.as_mut() {
            cache.flush();
        }
        *slot = None;
    });
}

/// Allocates `size` bytes, preferring the thread-local stack for pooled
/// classes. An uninitialized thread falls through to the dispatcher.
pub fn alloc(size: usize) -> *mut u8 {
    CACHE
        .try_with(|cell| match cell.borrow_mut().as_mut() {
            Some(cache) => cache.alloc(size),
            None => global::alloc(size),
        })
        .unwrap_or_else(|_| global::alloc(size))
}

/// Releases `ptr`, caching it locally when its class stack has room.
///
/// `size_hint` of 0 means unknown; the size is then recovered from the
/// block header, and headerless (heap) blocks are released directly.
///
/// # Safety
///
/// `ptr` must be null or a live pointer issued by this crate's allocation
/// paths, not freed since, with its owning pool still alive.
pub unsafe fn free(ptr: *mut u8, size_hint: usize) {
    if ptr.is_null() {
        return;
    }
    let direct = CACHE.try_with(|cell| match cell.borrow_mut().as_mut() {
        Some(cache) => {
            unsafe { cache.free(ptr, size_hint) };
            false
        }
        None => true,
    });
    if direct.unwrap_or(true) {
        unsafe { global::free(ptr) };
    }
}

/// Routes every cached block back to the dispatcher.
///
/// Idempotent: flushing an empty cache is a no-op.
pub fn flush() {
    let _ = CACHE.try_with(|cell| {
        if let Some(cache) = cell.borrow_mut().as_mut() {
            cache.flush();
        }
    });
}

/// Statistics snapshot for the calling thread, `None` before [`init`].
pub fn stats() -> Option<ThreadCacheStats> {
    CACHE
        .try_with(|cell| cell.borrow().as_ref().map(ThreadCache::stats))
        .ok()
        .flatten()
}

fn with_cache<T>(f: impl FnOnce(&mut Option<ThreadCache>) -> Result<T>) -> Result<T> {
    CACHE
        .try_with(|cell| f(&mut cell.borrow_mut()))
        .map_err(|_| crate::error::AllocError::ThreadStateUnavailable)?
}
