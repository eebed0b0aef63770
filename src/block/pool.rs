// src/block/pool.rs
//! Mutex-guarded block pool with an intrusive free list.
//!
//! # Architecture
//!
//! A pool owns fixed-size blocks, each prefixed with a tagged header. The
//! preferred backing store is one contiguous slab carved into blocks at
//! creation; when the slab allocation fails, blocks are allocated
//! individually. Growth past the initial count always allocates individual
//! blocks from the fallback heap, up to `max_blocks` when bounded.
//!
//! Handles are cheap clones over shared state; the pool tears down when the
//! last handle drops. Blocks still loaned out at teardown are the caller's
//! leak: the pool only releases what it can prove it owns (the slab as a
//! single unit, plus individually allocated blocks sitting on the free
//! list).

use crate::atomic::PeakCounter;
use crate::block::config::BlockPoolConfig;
use crate::block::header::{BLOCK_ALIGN, BlockHeader, HEADER_SIZE, POOL_BLOCK_MAGIC};
use crate::block::stats::BlockPoolStats;
use crate::error::{AllocError, Result};
use crossbeam::utils::CachePadded;
use std::alloc::{Layout, alloc, dealloc};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Contiguous backing store carved into blocks at creation time.
struct Slab {
    base: *mut u8,
    layout: Layout,
}

impl Slab {
    #[inline]
    fn contains(&self, header: *mut BlockHeader) -> bool {
        let addr = header as usize;
        let base = self.base as usize;
        addr >= base && addr < base + self.layout.size()
    }
}

/// Mutable pool state, all guarded by the one pool mutex.
pub(crate) struct PoolInner {
    free_head: *mut BlockHeader,
    free_blocks: usize,
    total_blocks: usize,
    slab: Option<Slab>,
}

// PoolInner holds raw pointers into memory exclusively owned by the pool;
// every access goes through the pool mutex.
unsafe impl Send for PoolInner {}

impl PoolInner {
    #[inline]
    fn push_free(&mut self, header: *mut BlockHeader) {
        unsafe { (*header).set_next_free(self.free_head) };
        self.free_head = header;
        self.free_blocks += 1;
    }

    #[inline]
    fn pop_free(&mut self) -> *mut BlockHeader {
        let header = self.free_head;
        if !header.is_null() {
            self.free_head = unsafe { (*header).next_free() };
            self.free_blocks -= 1;
        }
        header
    }
}

/// Shared pool state, pinned behind an `Arc` so block headers can carry a
/// stable back-reference for `free`-time dispatch.
pub struct PoolShared {
    pub(crate) user_size: usize,
    stride: usize,
    max_blocks: usize,
    inner: CachePadded<Mutex<PoolInner>>,
    peak_in_use: PeakCounter,
}

unsafe impl Sync for PoolShared {}

/// A size-classed block pool.
///
/// Cloning the handle shares the pool. All operations are safe to call from
/// any thread; progress is serialized by the pool's mutex.
///
/// # Example
///
/// ```rust
/// use tierpool::prelude::*;
///
/// let pool = BlockPool::new(BlockPoolConfig {
///     block_size: 128,
///     initial_blocks: 8,
///     max_blocks: 0,
/// })?;
///
/// let block = pool.alloc().unwrap();
/// unsafe { pool.free(block)? };
/// assert_eq!(pool.stats().in_use, 0);
/// # Ok::<(), tierpool::AllocError>(())
/// ```
pub struct BlockPool {
    shared: Arc<PoolShared>,
}

impl Clone for BlockPool {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl BlockPool {
    /// Creates a pool and pre-allocates `initial_blocks` blocks.
    ///
    /// Prefers one contiguous slab; falls back to individual allocations.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] when `initial_blocks > 0` and
    /// not a single block could be allocated.
    pub fn new(config: BlockPoolConfig) -> Result<Self> {
        // The block must at least hold a machine word so a zero-size
        // configuration still yields usable storage.
        let user_size = config.block_size.max(size_of::<usize>());
        let stride = (HEADER_SIZE + user_size).next_multiple_of(BLOCK_ALIGN);

        let mut initial = config.initial_blocks;
        if config.max_blocks > 0 && initial > config.max_blocks {
            warn!(
                initial_blocks = initial,
                max_blocks = config.max_blocks,
                "initial block count exceeds pool bound; clamping"
            );
            initial = config.max_blocks;
        }

        let shared = Arc::new(PoolShared {
            user_size,
            stride,
            max_blocks: config.max_blocks,
            inner: CachePadded::new(Mutex::new(PoolInner {
                free_head: ptr::null_mut(),
                free_blocks: 0,
                total_blocks: 0,
                slab: None,
            })),
            peak_in_use: PeakCounter::new(),
        });

        if initial > 0 {
            let owner = Arc::as_ptr(&shared);
            let mut inner = shared.inner.lock().unwrap();

            // Preferred strategy: one contiguous slab, carved into blocks.
            let slab_layout = Layout::from_size_align(stride * initial, BLOCK_ALIGN)
                .map_err(|e| AllocError::InvalidConfig(e.to_string()))?;
            let base = unsafe { alloc(slab_layout) };
            if !base.is_null() {
                for i in 0..initial {
                    let header = unsafe { base.add(i * stride).cast::<BlockHeader>() };
                    unsafe {
                        (*header).magic = POOL_BLOCK_MAGIC;
                        (*header).owner = owner;
                    }
                    inner.push_free(header);
                }
                inner.total_blocks = initial;
                inner.slab = Some(Slab {
                    base,
                    layout: slab_layout,
                });
            } else {
                // Fallback: individual blocks, keeping whatever succeeds.
                let block_layout = PoolShared::block_layout(stride);
                for _ in 0..initial {
                    let header = unsafe { alloc(block_layout).cast::<BlockHeader>() };
                    if header.is_null() {
                        break;
                    }
                    unsafe {
                        (*header).magic = POOL_BLOCK_MAGIC;
                        (*header).owner = owner;
                    }
                    inner.push_free(header);
                    inner.total_blocks += 1;
                }
                if inner.total_blocks == 0 {
                    return Err(AllocError::OutOfMemory);
                }
            }
        }

        Ok(Self { shared })
    }

    /// Takes a block from the pool, growing it when the free list is empty
    /// and the pool is unbounded or below its bound.
    ///
    /// Returns `None` when the pool is at capacity or the fallback heap
    /// refuses the growth allocation.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        PoolShared::take_block(&self.shared)
    }

    /// Returns a block to the pool's free list.
    ///
    /// # Safety
    ///
    /// `user` must be a pointer previously returned by [`alloc`](Self::alloc)
    /// on this pool (or routed here by the dispatcher) and not freed since.
    ///
    /// # Errors
    ///
    /// [`AllocError::UntaggedPointer`] when the header tag is missing,
    /// [`AllocError::ForeignPointer`] when the block belongs to another
    /// pool. Both are caller bugs; the block is not touched.
    pub unsafe fn free(&self, user: NonNull<u8>) -> Result<()> {
        let header = unsafe { BlockHeader::from_user(user.as_ptr()) };
        let magic = unsafe { (*header).magic };
        if magic != POOL_BLOCK_MAGIC {
            error!(ptr = ?user, magic, "free of pointer without a pool header");
            return Err(AllocError::UntaggedPointer);
        }
        let owner = unsafe { (*header).owner };
        if !ptr::eq(owner, Arc::as_ptr(&self.shared)) {
            error!(ptr = ?user, "free of block owned by a different pool");
            return Err(AllocError::ForeignPointer);
        }
        self.shared.inner.lock().unwrap().push_free(header);
        Ok(())
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> BlockPoolStats {
        self.shared.stats()
    }

    /// User-visible size of every block issued by this pool.
    #[inline]
    pub fn user_block_size(&self) -> usize {
        self.shared.user_size
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BlockPool")
            .field("block_size", &stats.block_size)
            .field("total_blocks", &stats.total_blocks)
            .field("free_blocks", &stats.free_blocks)
            .finish()
    }
}

impl PoolShared {
    #[inline]
    fn block_layout(stride: usize) -> Layout {
        // stride is a non-zero multiple of BLOCK_ALIGN; this cannot fail.
        Layout::from_size_align(stride, BLOCK_ALIGN).expect("block stride layout")
    }

    fn take_block(this: &Arc<Self>) -> Option<NonNull<u8>> {
        let mut inner = this.inner.lock().unwrap();

        let header = inner.pop_free();
        if !header.is_null() {
            let in_use = inner.total_blocks - inner.free_blocks;
            drop(inner);
            this.peak_in_use.observe(in_use as u64);
            return NonNull::new(unsafe { BlockHeader::user_ptr(header) });
        }

        if this.max_blocks > 0 && inner.total_blocks >= this.max_blocks {
            return None;
        }

        let header = unsafe { alloc(Self::block_layout(this.stride)).cast::<BlockHeader>() };
        if header.is_null() {
            return None;
        }
        unsafe {
            (*header).magic = POOL_BLOCK_MAGIC;
            (*header).owner = Arc::as_ptr(this);
            (*header).set_next_free(ptr::null_mut());
        }
        inner.total_blocks += 1;
        let in_use = inner.total_blocks - inner.free_blocks;
        drop(inner);
        this.peak_in_use.observe(in_use as u64);
        NonNull::new(unsafe { BlockHeader::user_ptr(header) })
    }

    /// Free-list push for dispatcher-routed frees.
    ///
    /// # Safety
    ///
    /// `this` must point at live pool state and `user` at a payload whose
    /// header names `this` as owner.
    pub(crate) unsafe fn free_routed(this: *const PoolShared, user: *mut u8) {
        let header = unsafe { BlockHeader::from_user(user) };
        debug_assert!(ptr::eq(unsafe { (*header).owner }, this));
        unsafe { (*this).inner.lock().unwrap().push_free(header) };
    }

    pub(crate) fn stats(&self) -> BlockPoolStats {
        let inner = self.inner.lock().unwrap();
        BlockPoolStats {
            total_blocks: inner.total_blocks,
            free_blocks: inner.free_blocks,
            in_use: inner.total_blocks - inner.free_blocks,
            block_size: self.user_size,
            total_memory: inner.total_blocks * self.stride,
            peak_in_use: self.peak_in_use.get() as usize,
        }
    }
}

impl Drop for PoolShared {
    /// Releases the slab as a single unit plus any individually allocated
    /// blocks on the free list. Blocks still loaned out are the caller's
    /// leak and are not reclaimed.
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();
        let mut header = inner.free_head;
        while !header.is_null() {
            let next = unsafe { (*header).next_free() };
            let in_slab = inner.slab.as_ref().is_some_and(|s| s.contains(header));
            if !in_slab {
                unsafe { dealloc(header.cast::<u8>(), Self::block_layout(self.stride)) };
            }
            header = next;
        }
        if let Some(slab) = inner.slab.take() {
            unsafe { dealloc(slab.base, slab.layout) };
        }
    }
}
