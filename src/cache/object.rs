// src/cache/object.rs
//! Per-thread typed object caches with constructor/destructor hooks.
//!
//! Same skeleton as the block cache in [`crate::cache::thread`], but the
//! stacks are keyed by an object kind instead of a size class, and each
//! kind may carry a constructor invoked on every pointer leaving `alloc`
//! and a destructor invoked on every pointer entering `free`. The pair is
//! symmetric across cache boundaries: hooks run on the user handoff edges,
//! so every pointer handed out has been constructed exactly once more than
//! it has been destructed.
//!
//! All blocks for one kind must be allocated with the same size; the cache
//! recycles them interchangeably within the kind.
//!
//! Builtin kinds cover the runtime's frequent object shapes; the custom
//! slots are reservable at startup via [`register_kind`]. Register hooks
//! before any thread touches the slot: threads pick up the hooks on their
//! next operation, so a mid-flight registration leaves earlier pointers
//! constructed with the old hooks.

use crate::cache::config::{ADJUSTMENT_INTERVAL, FLUSH_BATCH, ObjectCacheConfig, ObjectHook};
use crate::cache::stats::ObjectCacheStats;
use crate::error::{AllocError, Result};
use crate::global;
use std::cell::RefCell;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Number of kind slots, builtin plus reservable custom ones.
pub const NUM_OBJECT_KINDS: usize = 9;

/// Default per-kind cache capacity.
pub const DEFAULT_OBJECT_CACHE_SIZE: usize = 32;

/// Identifier of an object-cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Untyped scratch objects
    Generic,
    /// Short-lived string payloads
    String,
    /// Parsed document fragments
    Json,
    /// Arena chain nodes
    Arena,
    /// Framing buffers
    Buffer,
    /// First reservable slot
    Custom0,
    /// Second reservable slot
    Custom1,
    /// Third reservable slot
    Custom2,
    /// Fourth reservable slot
    Custom3,
}

impl ObjectKind {
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Generic => 0,
            Self::String => 1,
            Self::Json => 2,
            Self::Arena => 3,
            Self::Buffer => 4,
            Self::Custom0 => 5,
            Self::Custom1 => 6,
            Self::Custom2 => 7,
            Self::Custom3 => 8,
        }
    }

    /// Whether this slot is reservable via [`register_kind`].
    #[inline]
    pub fn is_custom(self) -> bool {
        matches!(
            self,
            Self::Custom0 | Self::Custom1 | Self::Custom2 | Self::Custom3
        )
    }

    /// Human-readable slot name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::String => "string",
            Self::Json => "json",
            Self::Arena => "arena",
            Self::Buffer => "buffer",
            Self::Custom0 => "custom0",
            Self::Custom1 => "custom1",
            Self::Custom2 => "custom2",
            Self::Custom3 => "custom3",
        }
    }
}

#[derive(Clone, Copy)]
struct KindHooks {
    ctor: Option<ObjectHook>,
    dtor: Option<ObjectHook>,
}

impl KindHooks {
    const NONE: Self = Self {
        ctor: None,
        dtor: None,
    };
}

static REGISTRY: RwLock<[KindHooks; NUM_OBJECT_KINDS]> =
    RwLock::new([KindHooks::NONE; NUM_OBJECT_KINDS]);
static SYSTEM_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Marks the object-cache subsystem initialized.
///
/// Idempotent: a second call warns and returns `Ok`.
pub fn system_init() -> Result<()> {
    if SYSTEM_INITIALIZED.swap(true, Ordering::AcqRel) {
        warn!("object cache subsystem already initialized");
    }
    Ok(())
}

/// Clears the hook registry and marks the subsystem uninitialized.
///
/// Per-thread caches must be flushed by their owning threads first.
pub fn system_shutdown() {
    *REGISTRY.write().unwrap() = [KindHooks::NONE; NUM_OBJECT_KINDS];
    SYSTEM_INITIALIZED.store(false, Ordering::Release);
}

/// Reserves a custom slot with the given hooks.
///
/// # Errors
///
/// [`AllocError::ReservedKind`] when `kind` is not one of the custom slots.
pub fn register_kind(
    kind: ObjectKind,
    ctor: Option<ObjectHook>,
    dtor: Option<ObjectHook>,
) -> Result<()> {
    if !kind.is_custom() {
        return Err(AllocError::ReservedKind);
    }
    REGISTRY.write().unwrap()[kind.index()] = KindHooks { ctor, dtor };
    Ok(())
}

#[inline]
fn hooks_for(kind: ObjectKind) -> KindHooks {
    REGISTRY.read().unwrap()[kind.index()]
}

thread_local! {
    static CACHE: RefCell<Option<ObjectCache>> = const { RefCell::new(None) };
}

struct KindStack {
    items: Vec<*mut u8>,
    max_size: usize,
}

struct ObjectCache {
    stacks: [KindStack; NUM_OBJECT_KINDS],
    adaptive_sizing: bool,
    growth_threshold: f64,
    shrink_threshold: f64,
    min_cache_size: usize,
    max_cache_size: usize,
    /// Shared across kinds, like the block cache's hit counter.
    hits: u64,
    misses: [u64; NUM_OBJECT_KINDS],
    flushes: u64,
    operations_since_adjustment: u64,
    thread_id: String,
}

impl ObjectCache {
    fn new(config: ObjectCacheConfig) -> Self {
        let config = config.sanitized();
        let per_kind = if config.max_size > 0 {
            config.max_size
        } else {
            DEFAULT_OBJECT_CACHE_SIZE
        };
        Self {
            stacks: std::array::from_fn(|_| KindStack {
                items: Vec::with_capacity(per_kind),
                max_size: per_kind,
            }),
            adaptive_sizing: config.adaptive_sizing,
            growth_threshold: config.growth_threshold,
            shrink_threshold: config.shrink_threshold,
            min_cache_size: config.min_cache_size,
            max_cache_size: config.max_cache_size,
            hits: 0,
            misses: [0; NUM_OBJECT_KINDS],
            flushes: 0,
            operations_since_adjustment: 0,
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }

    fn alloc(&mut self, kind: ObjectKind, size: usize) -> *mut u8 {
        self.operations_since_adjustment += 1;
        let hooks = hooks_for(kind);
        if let Some(ptr) = self.stacks[kind.index()].items.pop() {
            self.hits += 1;
            if let Some(ctor) = hooks.ctor {
                ctor(ptr);
            }
            return ptr;
        }
        self.misses[kind.index()] += 1;
        self.maybe_adjust();
        let ptr = global::alloc(size);
        if !ptr.is_null() {
            if let Some(ctor) = hooks.ctor {
                ctor(ptr);
            }
        }
        ptr
    }

    /// # Safety
    ///
    /// `ptr` must be a live pointer issued for `kind` through this crate.
    unsafe fn free(&mut self, kind: ObjectKind, ptr: *mut u8) {
        if let Some(dtor) = hooks_for(kind).dtor {
            dtor(ptr);
        }
        let stack = &mut self.stacks[kind.index()];
        if stack.items.len() < stack.max_size {
            stack.items.push(ptr);
            return;
        }
        unsafe { global::free(ptr) };
        self.maybe_adjust();
    }

    fn flush(&mut self, kind: ObjectKind) {
        let idx = kind.index();
        if self.stacks[idx].items.is_empty() {
            return;
        }
        let dtor = hooks_for(kind).dtor;
        // Small batches keep the destructor and free passes cache-friendly.
        let mut batch = [std::ptr::null_mut::<u8>(); FLUSH_BATCH];
        while !self.stacks[idx].items.is_empty() {
            let stack = &mut self.stacks[idx];
            let n = stack.items.len().min(FLUSH_BATCH);
            for slot in batch.iter_mut().take(n) {
                *slot = stack.items.pop().expect("non-empty stack");
            }
            if let Some(dtor) = dtor {
                for &ptr in batch.iter().take(n) {
                    dtor(ptr);
                }
            }
            for &ptr in batch.iter().take(n) {
                unsafe { global::free(ptr) };
            }
        }
        self.flushes += 1;
    }

    fn configure(&mut self, kind: ObjectKind, config: &ObjectCacheConfig) {
        let config = config.clone().sanitized();
        self.adaptive_sizing = config.adaptive_sizing;
        self.growth_threshold = config.growth_threshold;
        self.shrink_threshold = config.shrink_threshold;
        self.min_cache_size = config.min_cache_size;
        self.max_cache_size = config.max_cache_size;
        if config.max_size > 0 {
            let stack = &mut self.stacks[kind.index()];
            stack.max_size = config.max_size;
            while stack.items.len() > stack.max_size {
                if let Some(ptr) = stack.items.pop() {
                    unsafe { global::free(ptr) };
                }
            }
        }
    }

    fn maybe_adjust(&mut self) {
        if self.adaptive_sizing && self.operations_since_adjustment >= ADJUSTMENT_INTERVAL {
            self.adjust_size();
        }
    }

    fn adjust_size(&mut self) {
        for idx in 0..NUM_OBJECT_KINDS {
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
                while stack.items.len() > stack.max_size {
                    if let Some(ptr) = stack.items.pop() {
                        unsafe { global::free(ptr) };
                    }
                }
            }
        }
        self.operations_since_adjustment = 0;
    }

    fn stats(&self) -> ObjectCacheStats {
        ObjectCacheStats {
            thread_id: self.thread_id.clone(),
            hits: self.hits,
            misses: self.misses,
            flushes: self.flushes,
            counts: std::array::from_fn(|i| self.stacks[i].items.len()),
            max_sizes: std::array::from_fn(|i| self.stacks[i].max_size),
        }
    }
}

/// Initializes the calling thread's object cache with defaults.
///
/// Idempotent: an existing cache is left as is.
pub fn init() -> Result<()> {
    with_cache(|slot| {
        if slot.is_none() {
            *slot = Some(ObjectCache::new(ObjectCacheConfig::sized(
                DEFAULT_OBJECT_CACHE_SIZE,
            )));
        }
        Ok(())
    })
}

/// Initializes or re-configures the calling thread's object cache.
pub fn init_with_config(config: ObjectCacheConfig) -> Result<()> {
    with_cache(|slot| {
        match slot.as_mut() {
            Some(cache) => {
                for kind in ALL_KINDS {
                    cache.configure(kind, &config);
                }
            }
            None => *slot = Some(ObjectCache::new(config)),
        }
        Ok(())
    })
}

/// Applies sizing (and, for custom slots, hooks) to one kind.
///
/// Hooks on a non-custom kind are refused the way [`register_kind`] refuses
/// them; sizing alone is applied to any kind.
pub fn configure(kind: ObjectKind, config: &ObjectCacheConfig) -> Result<()> {
    if config.constructor.is_some() || config.destructor.is_some() {
        register_kind(kind, config.constructor, config.destructor)?;
    }
    with_cache(|slot| {
        if let Some(cache) = slot.as_mut() {
            cache.configure(kind, config);
        }
        Ok(())
    })
}

/// Flushes every kind and tears down the calling thread's object cache.
pub fn cleanup() {
    let _ = CACHE.try_with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(cache) = slot.as_mut() {
            for kind in ALL_KINDS {
                cache.flush(kind);
            }
        }
        *slot = None;
    });
}

/// Allocates a `size`-byte object of `kind`, running the kind's
/// constructor on the returned pointer.
///
/// Every allocation for one kind must use the same size; cached blocks are
/// recycled interchangeably within the kind.
pub fn alloc(kind: ObjectKind, size: usize) -> *mut u8 {
    CACHE
        .try_with(|cell| match cell.borrow_mut().as_mut() {
            Some(cache) => cache.alloc(kind, size),
            None => uncached_alloc(kind, size),
        })
        .unwrap_or_else(|_| uncached_alloc(kind, size))
}

/// Releases an object of `kind`, running the kind's destructor first.
///
/// # Safety
///
/// `ptr` must be null or a live pointer issued by [`alloc`] for the same
/// `kind`, not freed since.
pub unsafe fn free(kind: ObjectKind, ptr: *mut u8, _size: usize) {
    if ptr.is_null() {
        return;
    }
    let direct = CACHE.try_with(|cell| match cell.borrow_mut().as_mut() {
        Some(cache) => {
            unsafe { cache.free(kind, ptr) };
            false
        }
        None => true,
    });
    if direct.unwrap_or(true) {
        if let Some(dtor) = hooks_for(kind).dtor {
            dtor(ptr);
        }
        unsafe { global::free(ptr) };
    }
}

/// Turns adaptive capacity re-tuning on or off for the calling thread's
/// object cache. No effect before [`init`].
pub fn set_adaptive_sizing(enabled: bool) {
    let _ = CACHE.try_with(|cell| {
        if let Some(cache) = cell.borrow_mut().as_mut() {
            cache.adaptive_sizing = enabled;
        }
    });
}

/// Drains one kind's stack to the dispatcher, in destructor/free batches.
pub fn flush(kind: ObjectKind) {
    let _ = CACHE.try_with(|cell| {
        if let Some(cache) = cell.borrow_mut().as_mut() {
            cache.flush(kind);
        }
    });
}

/// Drains every kind's stack.
pub fn flush_all() {
    for kind in ALL_KINDS {
        flush(kind);
    }
}

/// Statistics snapshot for the calling thread, `None` before [`init`].
pub fn stats() -> Option<ObjectCacheStats> {
    CACHE
        .try_with(|cell| cell.borrow().as_ref().map(ObjectCache::stats))
        .ok()
        .flatten()
}

const ALL_KINDS: [ObjectKind; NUM_OBJECT_KINDS] = [
    ObjectKind::Generic,
    ObjectKind::String,
    ObjectKind::Json,
    ObjectKind::Arena,
    ObjectKind::Buffer,
    ObjectKind::Custom0,
    ObjectKind::Custom1,
    ObjectKind::Custom2,
    ObjectKind::Custom3,
];

fn uncached_alloc(kind: ObjectKind, size: usize) -> *mut u8 {
    let ptr = global::alloc(size);
    if !ptr.is_null() {
        if let Some(ctor) = hooks_for(kind).ctor {
            ctor(ptr);
        }
    }
    ptr
}

fn with_cache<T>(f: impl FnOnce(&mut Option<ObjectCache>) -> Result<T>) -> Result<T> {
    CACHE
        .try_with(|cell| f(&mut cell.borrow_mut()))
        .map_err(|_| AllocError::ThreadStateUnavailable)?
}
