// src/objpool.rs
//! Capped fixed-object-size pools with per-thread micro-caches.
//!
//! # Architecture
//!
//! Acquisition follows a three-tier cascade:
//!
//! 1. **Per-thread micro-cache** (a small stash per pool, uncontended lock)
//! 2. **Global free list** (pool mutex, links through the first object word)
//! 3. **Fresh allocation** (subject to `max_capacity`)
//!
//! Each thread keeps micro-caches for up to [`MICRO_CACHE_SLOTS`] distinct
//! pools, [`MICRO_CACHE_CAPACITY`] objects each. When a new pool is seen
//! with every slot taken, slot 0 (an oldest-slot proxy, not true LRU) is
//! drained back to its owner and reassigned.
//!
//! Micro-caches are registered with their pool and guarded by a mutex that
//! only the owning thread touches in steady state, so the fast path stays
//! effectively uncontended while pool destruction can still drain every
//! thread's cached objects back before storage is released. Objects a
//! caller acquired and never released are the caller's leak.

use crate::atomic::PeakCounter;
use crate::error::{AllocError, Result};
use crossbeam::utils::CachePadded;
use std::alloc::{Layout, alloc, dealloc};
use std::cell::RefCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Objects each micro-cache slot may hold.
pub const MICRO_CACHE_CAPACITY: usize = 8;
/// Distinct pools a thread keeps micro-caches for.
pub const MICRO_CACHE_SLOTS: usize = 8;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a fixed-object-size pool.
#[derive(Debug, Clone)]
pub struct ObjectPoolConfig {
    /// Size of each object in bytes (raised to hold the free-list link)
    pub object_size: usize,
    /// Objects to pre-allocate at creation
    pub initial_capacity: usize,
    /// Maximum objects the pool may grow to (0 = unbounded)
    pub max_capacity: usize,
}

impl Default for ObjectPoolConfig {
    fn default() -> Self {
        Self {
            object_size: 64,
            initial_capacity: 16,
            max_capacity: 0,
        }
    }
}

/// Point-in-time statistics for an object pool.
///
/// `free_objects` counts entries in every thread's micro-cache as well as
/// the global free list.
#[derive(Debug, Clone)]
pub struct ObjectPoolStats {
    /// Aligned size of each object in bytes
    pub object_size: usize,
    /// Objects owned by the pool
    pub total_objects: usize,
    /// Objects on the global free list or in a thread micro-cache
    pub free_objects: usize,
    /// Objects currently acquired
    pub current_in_use: usize,
    /// High-water mark of simultaneously acquired objects
    pub peak_in_use: usize,
    /// Growth bound (0 = unbounded)
    pub max_capacity: usize,
}

/// A thread's stash of released objects for one pool.
///
/// The mutex is uncontended for the owning thread; the pool destructor is
/// the only cross-thread locker, when it drains the stash.
struct MicroCache {
    slots: Mutex<Vec<*mut u8>>,
}

unsafe impl Send for MicroCache {}
unsafe impl Sync for MicroCache {}

struct ThreadSlot {
    pool_id: u64,
    owner: Weak<PoolShared>,
    cache: Arc<MicroCache>,
}

thread_local! {
    static MICRO_SLOTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

struct Slab {
    base: *mut u8,
    layout: Layout,
}

impl Slab {
    #[inline]
    fn contains(&self, obj: *mut u8) -> bool {
        let addr = obj as usize;
        let base = self.base as usize;
        addr >= base && addr < base + self.layout.size()
    }
}

struct PoolInner {
    free_head: *mut u8,
    free_count: usize,
    total_objects: usize,
    slab: Option<Slab>,
}

unsafe impl Send for PoolInner {}

impl PoolInner {
    #[inline]
    fn push_free(&mut self, obj: *mut u8) {
        // Free entries reuse their first word as the next link.
        unsafe { obj.cast::<*mut u8>().write(self.free_head) };
        self.free_head = obj;
        self.free_count += 1;
    }

    #[inline]
    fn pop_free(&mut self) -> *mut u8 {
        let obj = self.free_head;
        if !obj.is_null() {
            self.free_head = unsafe { obj.cast::<*mut u8>().read() };
            self.free_count -= 1;
        }
        obj
    }
}

struct PoolShared {
    id: u64,
    aligned_size: usize,
    max_capacity: usize,
    inner: CachePadded<Mutex<PoolInner>>,
    in_use: CachePadded<AtomicUsize>,
    peak_in_use: PeakCounter,
    caches: Mutex<Vec<Arc<MicroCache>>>,
}

unsafe impl Sync for PoolShared {}

/// A bounded pool of fixed-size objects with per-thread micro-caching.
///
/// Cloning the handle shares the pool; the pool tears down when the last
/// handle drops, draining every thread's micro-cache first.
///
/// # Example
///
/// ```rust
/// use tierpool::prelude::*;
///
/// let pool = ObjectPool::new(ObjectPoolConfig {
///     object_size: 48,
///     initial_capacity: 4,
///     max_capacity: 0,
/// })?;
///
/// let obj = pool.acquire().unwrap();
/// unsafe { pool.release(obj) };
/// assert_eq!(pool.stats().current_in_use, 0);
/// # Ok::<(), tierpool::AllocError>(())
/// ```
pub struct ObjectPool {
    shared: Arc<PoolShared>,
}

impl Clone for ObjectPool {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ObjectPool {
    /// Creates a pool and pre-allocates `initial_capacity` objects.
    ///
    /// Prefers one contiguous slab; falls back to individual allocations.
    pub fn new(config: ObjectPoolConfig) -> Result<Self> {
        let aligned_size = config
            .object_size
            .max(size_of::<*mut u8>())
            .next_multiple_of(align_of::<*mut u8>());

        let mut initial = config.initial_capacity;
        if config.max_capacity > 0 && initial > config.max_capacity {
            warn!(
                initial_capacity = initial,
                max_capacity = config.max_capacity,
                "initial capacity exceeds pool bound; clamping"
            );
            initial = config.max_capacity;
        }

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            aligned_size,
            max_capacity: config.max_capacity,
            inner: CachePadded::new(Mutex::new(PoolInner {
                free_head: ptr::null_mut(),
                free_count: 0,
                total_objects: 0,
                slab: None,
            })),
            in_use: CachePadded::new(AtomicUsize::new(0)),
            peak_in_use: PeakCounter::new(),
            caches: Mutex::new(Vec::new()),
        });

        if initial > 0 {
            let mut inner = shared.inner.lock().unwrap();
            let slab_layout = Layout::from_size_align(aligned_size * initial, align_of::<*mut u8>())
                .map_err(|e| AllocError::InvalidConfig(e.to_string()))?;
            let base = unsafe { alloc(slab_layout) };
            if !base.is_null() {
                for i in 0..initial {
                    inner.push_free(unsafe { base.add(i * aligned_size) });
                }
                inner.total_objects = initial;
                inner.slab = Some(Slab {
                    base,
                    layout: slab_layout,
                });
            } else {
                let layout = Self::object_layout(aligned_size);
                for _ in 0..initial {
                    let obj = unsafe { alloc(layout) };
                    if obj.is_null() {
                        break;
                    }
                    inner.push_free(obj);
                    inner.total_objects += 1;
                }
                if inner.total_objects == 0 {
                    return Err(AllocError::OutOfMemory);
                }
            }
        }

        Ok(Self { shared })
    }

    /// Takes an object from the micro-cache, the global free list, or a
    /// fresh allocation, in that order.
    ///
    /// Returns `None` once a bounded pool is fully loaned out.
    pub fn acquire(&self) -> Option<NonNull<u8>> {
        // Tier 1: this thread's micro-cache (existing slots only; slots are
        // created on release, the operation that populates them).
        let cached = MICRO_SLOTS
            .try_with(|slots| {
                let slots = slots.borrow();
                let slot = slots.iter().find(|s| s.pool_id == self.shared.id)?;
                slot.cache.slots.lock().unwrap().pop()
            })
            .ok()
            .flatten();
        if let Some(obj) = cached {
            self.note_acquired();
            return NonNull::new(obj);
        }

        // Tier 2: global free list.
        {
            let mut inner = self.shared.inner.lock().unwrap();
            let obj = inner.pop_free();
            if !obj.is_null() {
                drop(inner);
                self.note_acquired();
                return NonNull::new(obj);
            }

            // Tier 3: fresh allocation, subject to the bound.
            if self.shared.max_capacity > 0 && inner.total_objects >= self.shared.max_capacity {
                return None;
            }
            let obj = unsafe { alloc(Self::object_layout(self.shared.aligned_size)) };
            if obj.is_null() {
                return None;
            }
            inner.total_objects += 1;
            drop(inner);
            self.note_acquired();
            NonNull::new(obj)
        }
    }

    /// Returns an object to this thread's micro-cache, or to the global
    /// free list when the cache is full.
    ///
    /// # Safety
    ///
    /// `obj` must have been returned by [`acquire`](Self::acquire) on this
    /// pool and not released since.
    pub unsafe fn release(&self, obj: NonNull<u8>) {
        self.shared.in_use.fetch_sub(1, Ordering::Relaxed);

        let cached = MICRO_SLOTS
            .try_with(|slots| {
                let cache = self.micro_cache_slot(&mut slots.borrow_mut());
                let mut stash = cache.slots.lock().unwrap();
                if stash.len() < MICRO_CACHE_CAPACITY {
                    stash.push(obj.as_ptr());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if !cached {
            self.shared.inner.lock().unwrap().push_free(obj.as_ptr());
        }
    }

    /// Objects available for acquisition, micro-cached entries included.
    pub fn free_count(&self) -> usize {
        let global = self.shared.inner.lock().unwrap().free_count;
        let cached: usize = self
            .shared
            .caches
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.slots.lock().unwrap().len())
            .sum();
        global + cached
    }

    /// Objects owned by the pool.
    pub fn total_count(&self) -> usize {
        self.shared.inner.lock().unwrap().total_objects
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> ObjectPoolStats {
        ObjectPoolStats {
            object_size: self.shared.aligned_size,
            total_objects: self.total_count(),
            free_objects: self.free_count(),
            current_in_use: self.shared.in_use.load(Ordering::Relaxed),
            peak_in_use: self.shared.peak_in_use.get() as usize,
            max_capacity: self.shared.max_capacity,
        }
    }

    /// Aligned size of every object issued by this pool.
    #[inline]
    pub fn object_size(&self) -> usize {
        self.shared.aligned_size
    }

    #[inline]
    fn note_acquired(&self) {
        let now = self.shared.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.peak_in_use.observe(now as u64);
    }

    #[inline]
    fn object_layout(aligned_size: usize) -> Layout {
        Layout::from_size_align(aligned_size, align_of::<*mut u8>()).expect("object layout")
    }

    /// Finds or creates this thread's micro-cache for the pool, evicting
    /// slot 0 (drained back to its owner first) when all slots are taken.
    fn micro_cache_slot(&self, slots: &mut Vec<ThreadSlot>) -> Arc<MicroCache> {
        // Dead pools free their slot lazily on the next lookup.
        slots.retain(|s| s.owner.strong_count() > 0);

        if let Some(slot) = slots.iter().find(|s| s.pool_id == self.shared.id) {
            return Arc::clone(&slot.cache);
        }

        let cache = Arc::new(MicroCache {
            slots: Mutex::new(Vec::with_capacity(MICRO_CACHE_CAPACITY)),
        });
        let slot = ThreadSlot {
            pool_id: self.shared.id,
            owner: Arc::downgrade(&self.shared),
            cache: Arc::clone(&cache),
        };
        self.shared.caches.lock().unwrap().push(Arc::clone(&cache));

        if slots.len() < MICRO_CACHE_SLOTS {
            slots.push(slot);
        } else {
            let evicted = std::mem::replace(&mut slots[0], slot);
            drain_to_owner(&evicted);
        }
        cache
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ObjectPool")
            .field("object_size", &stats.object_size)
            .field("total_objects", &stats.total_objects)
            .field("current_in_use", &stats.current_in_use)
            .finish()
    }
}

/// Pushes an evicted slot's objects back to its owner pool.
///
/// Holds only the owner pool's lock. A dead owner means the storage is
/// gone; the stale pointers are discarded.
fn drain_to_owner(slot: &ThreadSlot) {
    let mut stash = slot.cache.slots.lock().unwrap();
    let Some(owner) = slot.owner.upgrade() else {
        stash.clear();
        return;
    };
    let mut inner = owner.inner.lock().unwrap();
    while let Some(obj) = stash.pop() {
        inner.push_free(obj);
    }
    // The pool no longer needs to drain this cache at destruction.
    drop(inner);
    owner
        .caches
        .lock()
        .unwrap()
        .retain(|c| !Arc::ptr_eq(c, &slot.cache));
}

impl Drop for PoolShared {
    /// Drains every thread's micro-cache back, then releases the slab as a
    /// single unit plus individually allocated free objects. Acquired but
    /// never-released objects are the caller's leak.
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();

        let mut free = Vec::with_capacity(inner.free_count);
        let mut obj = inner.free_head;
        while !obj.is_null() {
            let next = unsafe { obj.cast::<*mut u8>().read() };
            free.push(obj);
            obj = next;
        }
        for cache in self.caches.get_mut().unwrap().drain(..) {
            free.append(&mut cache.slots.lock().unwrap());
        }

        let layout = ObjectPool::object_layout(self.aligned_size);
        for obj in free {
            let in_slab = inner.slab.as_ref().is_some_and(|s| s.contains(obj));
            if !in_slab {
                unsafe { dealloc(obj, layout) };
            }
        }
        if let Some(slab) = inner.slab.take() {
            unsafe { dealloc(slab.base, slab.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pool(object_size: usize, initial: usize, max: usize) -> ObjectPool {
        ObjectPool::new(ObjectPoolConfig {
            object_size,
            initial_capacity: initial,
            max_capacity: max,
        })
        .unwrap()
    }

    fn in_fresh_thread(f: impl FnOnce() + Send + 'static) {
        thread::spawn(f).join().unwrap();
    }

    #[test]
    fn test_acquire_release_roundtrip() {
        in_fresh_thread(|| {
            let p = pool(48, 4, 0);
            let obj = p.acquire().unwrap();
            unsafe { ptr::write_bytes(obj.as_ptr(), 0x77, 48) };
            assert_eq!(p.stats().current_in_use, 1);
            unsafe { p.release(obj) };
            let stats = p.stats();
            assert_eq!(stats.current_in_use, 0);
            assert_eq!(stats.peak_in_use, 1);
            assert_eq!(stats.free_objects, 4);
        });
    }

    #[test]
    fn test_micro_cache_serves_before_global() {
        in_fresh_thread(|| {
            let p = pool(32, 4, 0);
            let obj = p.acquire().unwrap();
            unsafe { p.release(obj) };
            // The released object sits in this thread's micro-cache and
            // must come back before anything on the global free list.
            let again = p.acquire().unwrap();
            assert_eq!(obj, again);
            unsafe { p.release(again) };
        });
    }

    #[test]
    fn test_bounded_pool_exhausts() {
        in_fresh_thread(|| {
            let p = pool(32, 4, 4);
            let objs: Vec<_> = (0..4).map(|_| p.acquire().unwrap()).collect();
            assert!(p.acquire().is_none());
            for o in objs {
                unsafe { p.release(o) };
            }
            assert!(p.acquire().is_some());
        });
    }

    #[test]
    fn test_tiny_objects_hold_link() {
        let p = pool(1, 2, 0);
        assert!(p.object_size() >= size_of::<*mut u8>());
    }

    #[test]
    fn test_free_count_includes_micro_cache() {
        in_fresh_thread(|| {
            let p = pool(64, 16, 16);
            let objs: Vec<_> = (0..16).map(|_| p.acquire().unwrap()).collect();
            assert_eq!(p.free_count(), 0);
            for o in objs.iter().take(10) {
                unsafe { p.release(*o) };
            }
            // Micro-cache holds MICRO_CACHE_CAPACITY, the rest overflowed
            // to the global list; both count as free.
            assert_eq!(p.free_count(), 10);
            let more: Vec<_> = (0..5).map(|_| p.acquire().unwrap()).collect();
            let stats = p.stats();
            assert_eq!(stats.current_in_use, 11);
            assert_eq!(stats.peak_in_use, 16);
            assert!(stats.free_objects >= 5);
            for o in objs.iter().skip(10).chain(more.iter()) {
                unsafe { p.release(*o) };
            }
        });
    }

    #[test]
    fn test_slot_eviction_drains_to_owner() {
        in_fresh_thread(|| {
            let first = pool(32, 1, 0);
            let obj = first.acquire().unwrap();
            unsafe { first.release(obj) };
            assert_eq!(first.free_count(), 1);

            // Seeing MICRO_CACHE_SLOTS more pools evicts the oldest slot;
            // its object must land back on `first`'s global free list.
            let others: Vec<_> = (0..MICRO_CACHE_SLOTS).map(|_| pool(32, 1, 0)).collect();
            for p in &others {
                let o = p.acquire().unwrap();
                unsafe { p.release(o) };
            }
            assert_eq!(first.free_count(), 1);
            assert_eq!(first.shared.caches.lock().unwrap().len(), 0);
        });
    }

    #[test]
    fn test_destroy_with_cached_objects() {
        in_fresh_thread(|| {
            let p = pool(64, 8, 0);
            let objs: Vec<_> = (0..8).map(|_| p.acquire().unwrap()).collect();
            for o in objs {
                unsafe { p.release(o) };
            }
            // Objects sit in this thread's micro-cache; dropping the last
            // handle must drain and release them without touching the
            // thread again.
            drop(p);
        });
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let p = pool(64, 32, 0);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = p.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let obj = p.acquire().unwrap();
                        unsafe {
                            ptr::write_bytes(obj.as_ptr(), 0x11, 64);
                            p.release(obj);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = p.stats();
        assert_eq!(stats.current_in_use, 0);
        assert_eq!(stats.free_objects, stats.total_objects);
    }
}
