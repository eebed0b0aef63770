// src/class.rs
//! Size classes for the block-pool tiers.
//!
//! Requests are bucketed into three fixed classes; anything above the large
//! class bypasses the pools entirely and is served by the fallback heap.

/// User-visible block size of the small class (bytes).
pub const SMALL_BLOCK_SIZE: usize = 256;
/// User-visible block size of the medium class (bytes).
pub const MEDIUM_BLOCK_SIZE: usize = 1024;
/// User-visible block size of the large class (bytes).
pub const LARGE_BLOCK_SIZE: usize = 4096;

/// Number of pooled size classes (Oversize is not pooled).
pub const NUM_POOLED_CLASSES: usize = 3;

/// Size class of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Requests up to [`SMALL_BLOCK_SIZE`] bytes.
    Small,
    /// Requests up to [`MEDIUM_BLOCK_SIZE`] bytes.
    Medium,
    /// Requests up to [`LARGE_BLOCK_SIZE`] bytes.
    Large,
    /// Requests beyond the large class; served by the fallback heap.
    Oversize,
}

impl SizeClass {
    /// Classifies a request size. A zero-byte request is served by the
    /// small class, so the returned pointer is always valid and non-null.
    #[inline]
    pub fn for_size(size: usize) -> Self {
        if size <= SMALL_BLOCK_SIZE {
            Self::Small
        } else if size <= MEDIUM_BLOCK_SIZE {
            Self::Medium
        } else if size <= LARGE_BLOCK_SIZE {
            Self::Large
        } else {
            Self::Oversize
        }
    }

    /// User block size for pooled classes, 0 for [`SizeClass::Oversize`].
    #[inline]
    pub fn block_size(self) -> usize {
        match self {
            Self::Small => SMALL_BLOCK_SIZE,
            Self::Medium => MEDIUM_BLOCK_SIZE,
            Self::Large => LARGE_BLOCK_SIZE,
            Self::Oversize => 0,
        }
    }

    /// Stack index for per-class thread-cache storage.
    ///
    /// Only valid for pooled classes.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Medium => 1,
            Self::Large => 2,
            Self::Oversize => NUM_POOLED_CLASSES,
        }
    }

    /// Human-readable class name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Oversize => "oversize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_boundaries() {
        assert_eq!(SizeClass::for_size(0), SizeClass::Small);
        assert_eq!(SizeClass::for_size(1), SizeClass::Small);
        assert_eq!(SizeClass::for_size(SMALL_BLOCK_SIZE), SizeClass::Small);
        assert_eq!(SizeClass::for_size(SMALL_BLOCK_SIZE + 1), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(MEDIUM_BLOCK_SIZE), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(MEDIUM_BLOCK_SIZE + 1), SizeClass::Large);
        assert_eq!(SizeClass::for_size(LARGE_BLOCK_SIZE), SizeClass::Large);
        assert_eq!(SizeClass::for_size(LARGE_BLOCK_SIZE + 1), SizeClass::Oversize);
    }

    #[test]
    fn test_classes_monotonic() {
        assert!(SMALL_BLOCK_SIZE < MEDIUM_BLOCK_SIZE);
        assert!(MEDIUM_BLOCK_SIZE < LARGE_BLOCK_SIZE);
    }

    #[test]
    fn test_block_size() {
        assert_eq!(SizeClass::Small.block_size(), SMALL_BLOCK_SIZE);
        assert_eq!(SizeClass::Oversize.block_size(), 0);
    }
}
