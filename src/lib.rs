// src/lib.rs
//! # Multi-Tier Memory Pooling Library
//!
//! Bounded-latency block allocation for frequently allocated, short-lived
//! objects in a multi-threaded process: parsed requests, document
//! fragments, framing buffers, pool-table entries.
//!
//! The stack, bottom to top:
//! - Size-classed block pools with a shared free list and tagged headers
//! - A process-wide dispatcher routing `alloc`/`free` between the classes
//!   and the fallback heap
//! - Per-thread block caches (lock-free fast path, adaptive capacity)
//! - Per-thread typed object caches with constructor/destructor hooks
//! - Bounded object pools with per-thread micro-caches
//! - An allocation tracker with leak reports and a soft byte budget
//! - Bump-allocated arenas drawing their blocks from the pool tiers
//!
//! Initialization order: block pools → object pools → tracker → thread
//! caches → object caches → arenas. Teardown reverses it: flush every
//! live cache, destroy pools and arenas, then tracker cleanup, then
//! [`global::shutdown`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_safety_doc)]

pub mod arena;
pub mod block;
pub mod cache;
pub mod class;
pub mod error;
pub mod global;
pub mod objpool;
pub mod tracker;

mod atomic;

// Re-export main types
pub use arena::{Arena, ArenaStats};
pub use block::{BlockPool, BlockPoolConfig, BlockPoolStats};
pub use cache::{
    ObjectCacheConfig, ObjectCacheStats, ObjectKind, ThreadCacheConfig, ThreadCacheStats,
};
pub use class::SizeClass;
pub use error::{AllocError, Result};
pub use objpool::{ObjectPool, ObjectPoolConfig, ObjectPoolStats};
pub use tracker::TrackerStats;

/// Commonly used imports.
pub mod prelude {
    pub use crate::arena::{Arena, ArenaStats};
    pub use crate::block::{BlockPool, BlockPoolConfig, BlockPoolStats};
    pub use crate::cache::{
        ObjectCacheConfig, ObjectCacheStats, ObjectKind, ThreadCacheConfig, ThreadCacheStats,
    };
    pub use crate::class::SizeClass;
    pub use crate::error::{AllocError, Result};
    pub use crate::objpool::{ObjectPool, ObjectPoolConfig, ObjectPoolStats};
    pub use crate::tracker::TrackerStats;
}
