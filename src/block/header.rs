// src/block/header.rs
//! The tagged prefix placed in front of every dispatcher-issued block.
//!
//! Pool blocks and fallback-heap blocks share one header layout so the
//! single `free` entry point can inspect a fixed offset before the user
//! pointer and dispatch on the tag. The link word is overloaded: for pool
//! blocks it is the free-list link, for heap blocks it records the full
//! allocation size so the layout can be rebuilt at release time.

use super::pool::PoolShared;

/// Tag carried by blocks issued from a block pool.
pub(crate) const POOL_BLOCK_MAGIC: u32 = 0xB10C_A110;

/// Tag carried by blocks issued from the fallback heap.
pub(crate) const HEAP_BLOCK_MAGIC: u32 = 0xFA11_BACC;

/// Fixed-size prefix preceding every user pointer.
///
/// `#[repr(C)]` keeps the tag at offset 0 regardless of field reordering.
/// The user payload begins at the next pointer-aligned offset, which is
/// exactly `size_of::<BlockHeader>()`.
#[repr(C)]
pub(crate) struct BlockHeader {
    /// [`POOL_BLOCK_MAGIC`] or [`HEAP_BLOCK_MAGIC`].
    pub(crate) magic: u32,
    /// Owning pool for pool blocks; null for heap blocks.
    pub(crate) owner: *const PoolShared,
    /// Free-list link while pooled; allocation size for heap blocks.
    pub(crate) link: usize,
}

/// Bytes between the start of a block and its user payload.
pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Alignment of every block allocation (and therefore of the payload,
/// since `HEADER_SIZE` is a multiple of it).
pub(crate) const BLOCK_ALIGN: usize = align_of::<BlockHeader>();

impl BlockHeader {
    /// Header pointer for a user pointer previously issued by this crate.
    ///
    /// # Safety
    ///
    /// `user` must point at the payload of a live block carrying a
    /// [`BlockHeader`] prefix.
    #[inline]
    pub(crate) unsafe fn from_user(user: *mut u8) -> *mut BlockHeader {
        debug_assert!(!user.is_null());
        unsafe { user.sub(HEADER_SIZE).cast::<BlockHeader>() }
    }

    /// User pointer for a header.
    ///
    /// # Safety
    ///
    /// `header` must point at a block of at least `HEADER_SIZE` bytes.
    #[inline]
    pub(crate) unsafe fn user_ptr(header: *mut BlockHeader) -> *mut u8 {
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Free-list link for a pool block.
    #[inline]
    pub(crate) fn next_free(&self) -> *mut BlockHeader {
        self.link as *mut BlockHeader
    }

    /// Store the free-list link for a pool block.
    #[inline]
    pub(crate) fn set_next_free(&mut self, next: *mut BlockHeader) {
        self.link = next as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        // The tag must sit at offset 0 and the payload at a pointer-aligned
        // offset, or tag dispatch in `free` reads the wrong word.
        assert_eq!(std::mem::offset_of!(BlockHeader, magic), 0);
        assert_eq!(HEADER_SIZE % align_of::<*const u8>(), 0);
        assert!(BLOCK_ALIGN >= align_of::<usize>());
    }

    #[test]
    fn test_magics_distinct() {
        assert_ne!(POOL_BLOCK_MAGIC, HEAP_BLOCK_MAGIC);
    }
}
