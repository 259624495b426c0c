//! Error types for index operations.

use thiserror::Error;

/// Errors raised by the spatial index, the attribute store and their
/// persisted companion files.
///
/// A missing attribute chain is not an error: lookups report it with the
/// sentinel offset `0`.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying stream or file failure. Never retried.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A persisted file has the wrong magic bytes or an unknown version.
    #[error("invalid file format")]
    InvalidFormat,

    /// Offset points into the store header or past the end of the record area.
    #[error("invalid record offset {offset}")]
    InvalidOffset { offset: u32 },

    /// Record bytes at `offset` do not decode to UTF-8 text.
    #[error("corrupt record at offset {offset}")]
    CorruptRecord { offset: u32 },

    /// Appending would move the record area past the 32-bit offset space.
    #[error("attribute store is full")]
    StoreFull,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A loaded hash index was built with a different prefix length or
    /// bucket count than the one configured.
    #[error("hash index does not match configuration: {0}")]
    IndexMismatch(String),

    #[error("index is closed")]
    Closed,
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
