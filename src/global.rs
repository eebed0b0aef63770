// src/global.rs
//! Process-wide tier dispatcher.
//!
//! Routes `alloc` by size class to one of three shared block pools and
//! `free` by header tag back to the owning pool or the fallback heap.
//! Blocks the pools cannot serve (oversize requests, bounded or exhausted
//! pools) are issued from the fallback heap with a tagged header of their
//! own, so the single `free` entry point can rebuild the layout.
//!
//! The dispatcher never calls into the per-thread caches; the caches sit in
//! front of it and fall through on miss. Keeping that direction one-way is
//! what breaks the potential recursion between the tiers.

use crate::block::header::{BLOCK_ALIGN, BlockHeader, HEAP_BLOCK_MAGIC, HEADER_SIZE, POOL_BLOCK_MAGIC};
use crate::block::pool::PoolShared;
use crate::block::{BlockPool, BlockPoolConfig, BlockPoolStats};
use crate::class::SizeClass;
use crate::error::Result;
use std::alloc::{Layout, dealloc};
use std::ptr;
use std::sync::RwLock;
use tracing::{error, warn};

/// Default pre-allocated block count for the small class.
pub const DEFAULT_SMALL_BLOCKS: usize = 64;
/// Default pre-allocated block count for the medium class.
pub const DEFAULT_MEDIUM_BLOCKS: usize = 32;
/// Default pre-allocated block count for the large class.
pub const DEFAULT_LARGE_BLOCKS: usize = 16;

struct Pools {
    small: BlockPool,
    medium: BlockPool,
    large: BlockPool,
}

impl Pools {
    fn for_class(&self, class: SizeClass) -> Option<&BlockPool> {
        match class {
            SizeClass::Small => Some(&self.small),
            SizeClass::Medium => Some(&self.medium),
            SizeClass::Large => Some(&self.large),
            SizeClass::Oversize => None,
        }
    }
}

static POOLS: RwLock<Option<Pools>> = RwLock::new(None);

/// Initializes the three class pools with the given initial block counts.
///
/// Idempotent: a second call logs a warning and returns `Ok`. On partial
/// failure every pool created so far is torn down before the error is
/// returned.
pub fn init(small_initial: usize, medium_initial: usize, large_initial: usize) -> Result<()> {
    let mut guard = POOLS.write().unwrap();
    if guard.is_some() {
        warn!("block pool subsystem already initialized");
        return Ok(());
    }
    // Construction order is irrelevant; `?` drops the pools already built.
    let small = BlockPool::new(BlockPoolConfig::small_class(small_initial))?;
    let medium = BlockPool::new(BlockPoolConfig::medium_class(medium_initial))?;
    let large = BlockPool::new(BlockPoolConfig::large_class(large_initial))?;
    *guard = Some(Pools {
        small,
        medium,
        large,
    });
    Ok(())
}

/// [`init`] with the default block counts.
pub fn init_default() -> Result<()> {
    init(
        DEFAULT_SMALL_BLOCKS,
        DEFAULT_MEDIUM_BLOCKS,
        DEFAULT_LARGE_BLOCKS,
    )
}

/// Destroys the three class pools.
///
/// Callers are responsible for flushing every live thread cache and object
/// cache first; blocks still sitting in unflushed caches leak. Using the
/// allocator after shutdown (other than re-initializing) is undefined.
pub fn shutdown() {
    let mut guard = POOLS.write().unwrap();
    *guard = None;
}

/// Whether the class pools currently exist.
pub fn is_initialized() -> bool {
    POOLS.read().unwrap().is_some()
}

/// Allocates `size` bytes, routed by size class.
///
/// Lazily initializes the pools with default counts on first use. Pooled
/// classes that cannot serve the request fall back to the heap at the class
/// block size, so the block stays interchangeable with pool blocks of that
/// class. Returns null only when the fallback heap itself fails.
pub fn alloc(size: usize) -> *mut u8 {
    let class = SizeClass::for_size(size);
    if class == SizeClass::Oversize {
        return heap_alloc(size);
    }

    {
        let guard = POOLS.read().unwrap();
        if let Some(pools) = guard.as_ref() {
            return class_alloc(pools, class);
        }
    }
    // First touch: establish the pools, tolerating a racing initializer.
    let _ = init_default();
    let guard = POOLS.read().unwrap();
    match guard.as_ref() {
        Some(pools) => class_alloc(pools, class),
        // Lazy init failed outright; the heap is the last resort.
        None => heap_alloc(class.block_size()),
    }
}

fn class_alloc(pools: &Pools, class: SizeClass) -> *mut u8 {
    let pool = pools.for_class(class).expect("pooled class");
    match pool.alloc() {
        Some(block) => block.as_ptr(),
        None => heap_alloc(class.block_size()),
    }
}

/// Releases a pointer previously returned by [`alloc`].
///
/// Null is a no-op. Pool-tagged blocks return to their owning pool's free
/// list; heap-tagged blocks are released with their recorded layout. A
/// pointer with neither tag is a caller bug: it is logged and ignored,
/// since nothing can be safely released.
///
/// # Safety
///
/// `ptr` must be null or a pointer obtained from [`alloc`] (directly or via
/// a cache layer) that has not already been freed, and its owning pool must
/// still be alive.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = unsafe { BlockHeader::from_user(ptr) };
    let magic = unsafe { (*header).magic };
    match magic {
        POOL_BLOCK_MAGIC => {
            let owner = unsafe { (*header).owner };
            unsafe { PoolShared::free_routed(owner, ptr) };
        }
        HEAP_BLOCK_MAGIC => {
            let total = unsafe { (*header).link };
            // Size and alignment were fixed at allocation time.
            let layout = Layout::from_size_align(total, BLOCK_ALIGN).expect("heap block layout");
            unsafe { dealloc(header.cast::<u8>(), layout) };
        }
        _ => {
            error!(?ptr, magic, "free of pointer not issued by this allocator");
        }
    }
}

/// User-visible block size behind a pointer, or 0 for heap-issued blocks.
///
/// Lets the cache layers distinguish pool blocks from heap blocks without
/// owning the size themselves.
///
/// # Safety
///
/// `ptr` must be null or a live pointer obtained from [`alloc`].
pub unsafe fn block_size_for(ptr: *const u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    let header = unsafe { BlockHeader::from_user(ptr.cast_mut()) };
    if unsafe { (*header).magic } != POOL_BLOCK_MAGIC {
        return 0;
    }
    let owner = unsafe { (*header).owner };
    unsafe { (*owner).user_size }
}

/// Statistics snapshot of one class pool, `None` for
/// [`SizeClass::Oversize`] or before initialization.
pub fn class_stats(class: SizeClass) -> Option<BlockPoolStats> {
    let guard = POOLS.read().unwrap();
    let pools = guard.as_ref()?;
    pools.for_class(class).map(BlockPool::stats)
}

fn heap_alloc(size: usize) -> *mut u8 {
    let Some(total) = size
        .max(1)
        .checked_add(HEADER_SIZE)
        .and_then(|n| n.checked_next_multiple_of(BLOCK_ALIGN))
    else {
        return ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, BLOCK_ALIGN) else {
        return ptr::null_mut();
    };
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }
    let header = base.cast::<BlockHeader>();
    unsafe {
        (*header).magic = HEAP_BLOCK_MAGIC;
        (*header).owner = ptr::null();
        (*header).link = total;
        BlockHeader::user_ptr(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{LARGE_BLOCK_SIZE, MEDIUM_BLOCK_SIZE, SMALL_BLOCK_SIZE};

    // Unit tests never call `shutdown`; lifecycle coverage lives in the
    // integration binary where global-state tests are serialized.

    #[test]
    fn test_alloc_lazy_initializes() {
        let ptr = alloc(100);
        assert!(!ptr.is_null());
        assert!(is_initialized());
        unsafe { free(ptr) };
    }

    #[test]
    fn test_class_routing() {
        for (size, expected) in [
            (1, SMALL_BLOCK_SIZE),
            (SMALL_BLOCK_SIZE, SMALL_BLOCK_SIZE),
            (SMALL_BLOCK_SIZE + 1, MEDIUM_BLOCK_SIZE),
            (MEDIUM_BLOCK_SIZE + 1, LARGE_BLOCK_SIZE),
            (LARGE_BLOCK_SIZE, LARGE_BLOCK_SIZE),
        ] {
            let ptr = alloc(size);
            assert!(!ptr.is_null());
            assert_eq!(unsafe { block_size_for(ptr) }, expected, "size {size}");
            unsafe { free(ptr) };
        }
    }

    #[test]
    fn test_oversize_bypasses_pools() {
        let ptr = alloc(LARGE_BLOCK_SIZE + 1);
        assert!(!ptr.is_null());
        assert_eq!(unsafe { block_size_for(ptr) }, 0);
        unsafe {
            std::ptr::write_bytes(ptr, 0xC3, LARGE_BLOCK_SIZE + 1);
            free(ptr);
        }
    }

    #[test]
    fn test_zero_size_alloc() {
        let ptr = alloc(0);
        assert!(!ptr.is_null());
        assert_eq!(unsafe { block_size_for(ptr) }, SMALL_BLOCK_SIZE);
        unsafe { free(ptr) };
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { free(ptr::null_mut()) };
    }

    #[test]
    fn test_block_size_for_null() {
        assert_eq!(unsafe { block_size_for(ptr::null()) }, 0);
    }

    #[test]
    fn test_cross_thread_free() {
        use std::thread;

        let ptr = alloc(64) as usize;
        thread::spawn(move || unsafe { free(ptr as *mut u8) })
            .join()
            .unwrap();
    }
}
