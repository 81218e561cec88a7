//! Error types for the XMF decoder.

use std::path::PathBuf;
use thiserror::Error;

/// Why a leaf's unpacker chain could not produce its content.
///
/// Stored inside the decoded node rather than returned, so siblings and
/// ancestors keep decoding when one resource is damaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackFailure {
    /// Index of the failing entry in the unpacker chain.
    pub stage: usize,
    pub reason: String,
}

impl std::fmt::Display for UnpackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unpacker #{}: {}", self.stage, self.reason)
    }
}

/// Main error type for XMF decoding.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Missing "XMF_" tag at offset 0
    #[error("Invalid XMF file: expected \"XMF_\" magic, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    /// Version tag other than "1.00" / "2.00"
    #[error("Unsupported XMF version: {0:?}")]
    UnsupportedVersion([u8; 4]),

    /// Read past the end of the backing buffer (or of a bounded sub-block)
    #[error("Unexpected end of data at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEof { offset: u64, needed: u64, available: u64 },

    /// VLQ whose fourth byte still carries a continuation flag
    #[error("VLQ at offset {offset} exceeds 4 bytes")]
    VlqTooLong { offset: u64 },

    /// Enumerated tag outside its closed set
    #[error("Unknown {kind} tag {value} at offset {offset}")]
    UnknownTag { offset: u64, kind: &'static str, value: u32 },

    /// Declared size and consumed bytes disagree
    #[error("Size mismatch in {context} at offset {offset}: declared {expected} bytes, consumed {consumed}")]
    SizeMismatch {
        offset: u64,
        context: &'static str,
        expected: u64,
        consumed: u64,
    },

    /// Unpacker chain failed for the node at `offset`
    #[error("Cannot unpack node at offset {offset}: {failure}")]
    Unpack { offset: u64, failure: UnpackFailure },

    /// Pointer chasing went deeper than the configured ceiling
    #[error("Node at offset {offset} exceeds the maximum nesting depth of {limit}")]
    DepthExceeded { offset: u64, limit: usize },

    /// Folder indirection resolved to a resource node
    #[error("Node at offset {offset} is not a folder")]
    NotAFolder { offset: u64 },

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Offset in the backing file the error points at, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::UnexpectedEof { offset, .. }
            | Self::VlqTooLong { offset }
            | Self::UnknownTag { offset, .. }
            | Self::SizeMismatch { offset, .. }
            | Self::Unpack { offset, .. }
            | Self::DepthExceeded { offset, .. }
            | Self::NotAFolder { offset } => Some(*offset),
            _ => None,
        }
    }

    /// Whether the error only invalidates the content of a single node.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unpack { .. })
    }
}

/// Result type alias for XMF operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidMagic { found: *b"RIFF" };
        assert!(e.to_string().contains("magic"));

        let e = Error::SizeMismatch {
            offset: 12,
            context: "node",
            expected: 5,
            consumed: 9,
        };
        let msg = e.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("5"));
        assert!(msg.contains("9"));
        assert_eq!(e.offset(), Some(12));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.offset(), None);
    }

    #[test]
    fn test_only_unpack_is_recoverable() {
        let failure = UnpackFailure { stage: 0, reason: "corrupt deflate stream".into() };
        assert!(Error::Unpack { offset: 3, failure }.is_recoverable());
        assert!(!Error::VlqTooLong { offset: 3 }.is_recoverable());
    }
}
