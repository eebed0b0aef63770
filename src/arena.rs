// src/arena.rs
//! Bump-allocated arenas with scoped bulk free.
//!
//! An arena owns a chain of blocks and hands out pointer-aligned slices of
//! them; individual allocations are never freed, the whole arena is reset
//! or destroyed at once. Blocks are drawn through the thread cache, so
//! chain growth rides the same pool tiers as everything else (the cache
//! routes block requests past the large class to the fallback heap).
//!
//! Arena payloads carry no per-allocation headers; the chain node at the
//! front of each block records the size needed to free it.

use crate::cache::thread;
use std::cell::RefCell;
use std::ptr;

/// Block size used when an arena is created with `default_block_size == 0`.
pub const DEFAULT_ARENA_BLOCK_SIZE: usize = 4096;

/// Chain node at the front of every arena block; payload follows.
#[repr(C)]
struct ArenaBlock {
    next: *mut ArenaBlock,
    size: usize,
    used: usize,
}

const ARENA_HEADER: usize = size_of::<ArenaBlock>();

/// Point-in-time statistics for an arena.
#[derive(Debug, Clone, Default)]
pub struct ArenaStats {
    /// Bytes handed out since creation or the last reset
    pub total_allocated: usize,
    /// Payload bytes across all chained blocks
    pub total_block_size: usize,
    /// Blocks in the chain
    pub block_count: usize,
}

/// A bump allocator over pool-backed blocks.
///
/// Not shareable across threads; for the common per-thread arena see the
/// module-level [`alloc`]/[`reset_current_thread`]/[`destroy_current_thread`]
/// functions.
pub struct Arena {
    head: *mut ArenaBlock,
    default_block_size: usize,
    total_allocated: usize,
    total_block_size: usize,
    block_count: usize,
}

impl Arena {
    /// Creates an empty arena. `default_block_size == 0` selects
    /// [`DEFAULT_ARENA_BLOCK_SIZE`].
    pub fn new(default_block_size: usize) -> Self {
        let default_block_size = if default_block_size == 0 {
            DEFAULT_ARENA_BLOCK_SIZE
        } else {
            default_block_size
        };
        Self {
            head: ptr::null_mut(),
            default_block_size,
            total_allocated: 0,
            total_block_size: 0,
            block_count: 0,
        }
    }

    /// Bumps out `size` bytes, pointer-aligned.
    ///
    /// Grows the chain by `max(default_block_size, size)` when the current
    /// block lacks room. Returns null only when the underlying allocation
    /// fails.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        let aligned = size.max(1).next_multiple_of(align_of::<usize>());

        let room = !self.head.is_null() && {
            let head = unsafe { &*self.head };
            head.used + aligned <= head.size
        };
        if !room && self.grow(aligned).is_none() {
            return ptr::null_mut();
        }

        let head = unsafe { &mut *self.head };
        let out = unsafe { self.head.cast::<u8>().add(ARENA_HEADER + head.used) };
        head.used += aligned;
        self.total_allocated += aligned;
        out
    }

    fn grow(&mut self, aligned_size: usize) -> Option<()> {
        let block_size = self.default_block_size.max(aligned_size);
        let raw = thread::alloc(ARENA_HEADER + block_size);
        if raw.is_null() {
            return None;
        }
        let block = raw.cast::<ArenaBlock>();
        unsafe {
            block.write(ArenaBlock {
                next: self.head,
                size: block_size,
                used: 0,
            });
        }
        self.head = block;
        self.block_count += 1;
        self.total_block_size += block_size;
        Some(())
    }

    /// Rewinds every block without releasing any; the chain is reused by
    /// subsequent allocations. Block statistics are kept.
    pub fn reset(&mut self) {
        let mut block = self.head;
        while !block.is_null() {
            unsafe {
                (*block).used = 0;
                block = (*block).next;
            }
        }
        self.total_allocated = 0;
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            total_allocated: self.total_allocated,
            total_block_size: self.total_block_size,
            block_count: self.block_count,
        }
    }
}

impl Drop for Arena {
    /// Returns every block through the thread-cache free path.
    fn drop(&mut self) {
        let mut block = self.head;
        while !block.is_null() {
            let next = unsafe { (*block).next };
            let hint = ARENA_HEADER + unsafe { (*block).size };
            unsafe { thread::free(block.cast::<u8>(), hint) };
            block = next;
        }
        self.head = ptr::null_mut();
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("block_count", &self.block_count)
            .field("total_allocated", &self.total_allocated)
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arena>> = const { RefCell::new(None) };
}

/// Bumps `size` bytes out of the calling thread's arena, creating it on
/// first use with the default block size.
pub fn alloc(size: usize) -> *mut u8 {
    CURRENT
        .try_with(|cell| {
            let mut slot = cell.borrow_mut();
            slot.get_or_insert_with(|| Arena::new(0)).alloc(size)
        })
        .unwrap_or(ptr::null_mut())
}

/// Runs `f` against the calling thread's arena, creating it on demand.
pub fn with_current<T>(f: impl FnOnce(&mut Arena) -> T) -> Option<T> {
    CURRENT
        .try_with(|cell| {
            let mut slot = cell.borrow_mut();
            f(slot.get_or_insert_with(|| Arena::new(0)))
        })
        .ok()
}

/// Rewinds the calling thread's arena, keeping its blocks.
pub fn reset_current_thread() {
    let _ = CURRENT.try_with(|cell| {
        if let Some(arena) = cell.borrow_mut().as_mut() {
            arena.reset();
        }
    });
}

/// Destroys the calling thread's arena, returning its blocks to the cache
/// tiers. The next [`alloc`] starts a fresh arena.
pub fn destroy_current_thread() {
    let _ = CURRENT.try_with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Statistics of the calling thread's arena, `None` before first use.
pub fn current_stats() -> Option<ArenaStats> {
    CURRENT
        .try_with(|cell| cell.borrow().as_ref().map(Arena::stats))
        .ok()
        .flatten()
}
