// src/tracker/intern.rs
//! Reference-counted string interning for allocation-site paths.
//!
//! Entry records come from a dedicated object pool (which is why the object
//! pool subsystem initializes before the tracker); character data comes
//! from the dispatcher. Buckets chain entries by content hash, so equal
//! paths share one entry and one copy of the bytes.
//!
//! The pool lives under the tracker mutex; none of this is internally
//! synchronized.

use crate::error::Result;
use crate::global;
use crate::objpool::{ObjectPool, ObjectPoolConfig};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::ptr::{self, NonNull};

/// One interned string: a refcount plus dispatcher-allocated bytes.
#[repr(C)]
pub(crate) struct InternEntry {
    refs: usize,
    len: usize,
    bytes: *mut u8,
}

pub(crate) struct StringPool {
    entries: ObjectPool,
    buckets: HashMap<u64, Vec<NonNull<InternEntry>>>,
    unique: usize,
    saved_bytes: usize,
}

impl StringPool {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            entries: ObjectPool::new(ObjectPoolConfig {
                object_size: size_of::<InternEntry>(),
                initial_capacity: 32,
                max_capacity: 0,
            })?,
            buckets: HashMap::new(),
            unique: 0,
            saved_bytes: 0,
        })
    }

    /// Interns `s`, returning a stable entry pointer.
    ///
    /// A repeated path bumps the existing entry's refcount instead of
    /// copying the bytes again. Returns `None` when storage for a new
    /// entry cannot be allocated.
    pub(crate) fn intern(&mut self, s: &str) -> Option<NonNull<InternEntry>> {
        let hash = hash_str(s);
        if let Some(bucket) = self.buckets.get(&hash) {
            for &entry in bucket {
                if unsafe { entry_str(entry) } == s {
                    unsafe { (*entry.as_ptr()).refs += 1 };
                    self.saved_bytes += s.len();
                    return Some(entry);
                }
            }
        }

        let entry = self.entries.acquire()?.cast::<InternEntry>();
        let bytes = global::alloc(s.len().max(1));
        if bytes.is_null() {
            unsafe { self.entries.release(entry.cast()) };
            return None;
        }
        unsafe {
            ptr::copy_nonoverlapping(s.as_ptr(), bytes, s.len());
            entry.as_ptr().write(InternEntry {
                refs: 1,
                len: s.len(),
                bytes,
            });
        }
        self.buckets.entry(hash).or_default().push(entry);
        self.unique += 1;
        Some(entry)
    }

    /// Drops one reference; the entry and its bytes are released when the
    /// count reaches zero.
    ///
    /// # Safety
    ///
    /// `entry` must have come from [`intern`](Self::intern) on this pool
    /// and still hold a reference.
    pub(crate) unsafe fn release(&mut self, entry: NonNull<InternEntry>) {
        let e = unsafe { &mut *entry.as_ptr() };
        debug_assert!(e.refs > 0);
        e.refs -= 1;
        if e.refs > 0 {
            return;
        }

        let hash = hash_str(unsafe { entry_str(entry) });
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|&b| b != entry);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
        unsafe {
            global::free(e.bytes);
            self.entries.release(entry.cast());
        }
        self.unique -= 1;
    }

    /// (unique entries, bytes saved by deduplication)
    pub(crate) fn stats(&self) -> (usize, usize) {
        (self.unique, self.saved_bytes)
    }
}

impl Drop for StringPool {
    fn drop(&mut self) {
        for bucket in self.buckets.values() {
            for &entry in bucket {
                unsafe {
                    global::free((*entry.as_ptr()).bytes);
                    self.entries.release(entry.cast());
                }
            }
        }
        self.buckets.clear();
    }
}

/// Text of an interned entry.
///
/// # Safety
///
/// `entry` must be live; the returned borrow must not outlive the entry.
pub(crate) unsafe fn entry_str<'a>(entry: NonNull<InternEntry>) -> &'a str {
    let e = unsafe { &*entry.as_ptr() };
    let bytes = unsafe { std::slice::from_raw_parts(e.bytes, e.len) };
    // Entries are only ever built from &str input.
    unsafe { std::str::from_utf8_unchecked(bytes) }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(s.as_bytes());
    hasher.finish()
}
