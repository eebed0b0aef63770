// src/error.rs
//! Error types for allocator operations with advanced conversion support

use std::fmt;

/// Errors that can occur during allocator operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The fallback heap refused the allocation
    OutOfMemory,
    /// A bounded pool is at capacity with an empty free list
    PoolExhausted,
    /// A pointer handed to `free` does not belong to this pool
    ForeignPointer,
    /// A pointer carries no recognized block header
    UntaggedPointer,
    /// Subsystem used before initialization
    NotInitialized,
    /// Per-thread state could not be established
    ThreadStateUnavailable,
    /// Operation is only valid for reservable custom slots
    ReservedKind,
    /// Configuration value outside the legal range
    InvalidConfig(String),
    /// Invalid allocator state
    InvalidState(String),
    /// I/O error (leak-report writing)
    Io(String),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::PoolExhausted => write!(f, "Pool is at capacity"),
            Self::ForeignPointer => write!(f, "Pointer belongs to a different pool"),
            Self::UntaggedPointer => write!(f, "Pointer carries no block header"),
            Self::NotInitialized => write!(f, "Subsystem is not initialized"),
            Self::ThreadStateUnavailable => write!(f, "Thread-local state unavailable"),
            Self::ReservedKind => write!(f, "Kind is not a reservable custom slot"),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for AllocError {}

// ============================================================================
// ERROR CONVERSION - Makes the allocator compatible with host error types
// ============================================================================

/// Convert AllocError to std::io::Error
impl From<AllocError> for std::io::Error {
    fn from(err: AllocError) -> Self {
        use std::io::ErrorKind;
        match err {
            AllocError::OutOfMemory | AllocError::PoolExhausted => {
                std::io::Error::new(ErrorKind::OutOfMemory, err)
            }
            AllocError::Io(msg) => std::io::Error::other(msg),
            _ => std::io::Error::other(err),
        }
    }
}

/// Convert std::io::Error to AllocError
impl From<std::io::Error> for AllocError {
    fn from(err: std::io::Error) -> Self {
        AllocError::Io(err.to_string())
    }
}

/// Convert AllocError to anyhow::Error (for host runtime compatibility)
#[cfg(feature = "anyhow")]
impl From<AllocError> for anyhow::Error {
    fn from(err: AllocError) -> Self {
        anyhow::anyhow!("{}", err)
    }
}

/// Allow using ? with anyhow::Error
#[cfg(feature = "anyhow")]
impl From<anyhow::Error> for AllocError {
    fn from(err: anyhow::Error) -> Self {
        AllocError::InvalidState(err.to_string())
    }
}

// ============================================================================
// RESULT TYPE ALIASES
// ============================================================================

/// Result type alias for allocator operations
///
/// Note: When using with other Result types (like anyhow::Result),
/// either qualify the type (`tierpool::Result<T>`) or use the conversion traits.
pub type Result<T> = std::result::Result<T, AllocError>;

// ============================================================================
// EXTENSION TRAIT FOR EASY CONVERSION
// ============================================================================

/// Extension trait for converting Results between different error types
pub trait ResultExt<T> {
    /// Convert to anyhow::Result
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T>;

    /// Convert to io::Result
    fn into_io(self) -> std::io::Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| e.into())
    }

    fn into_io(self) -> std::io::Result<T> {
        self.map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_io() {
        let err = AllocError::PoolExhausted;
        let io_err: std::io::Error = err.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_result_ext() {
        let result: Result<u32> = Ok(42);
        let io_result = result.into_io();
        assert_eq!(io_result.unwrap(), 42);
    }

    #[cfg(feature = "anyhow")]
    #[test]
    fn test_anyhow_conversion() {
        let err = AllocError::ForeignPointer;
        let anyhow_err: anyhow::Error = err.into();
        assert!(anyhow_err.to_string().contains("different pool"));
    }
}
