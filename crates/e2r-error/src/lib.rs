#![forbid(unsafe_code)]
//! Error types for e2rescue.
//!
//! Defines `E2rError` and a `Result<T>` alias used throughout the workspace.

use thiserror::Error;

/// Unified error type for all e2rescue operations.
///
/// `Io` and `CorruptSuperblock` are the two fatal terminal states of a
/// repair run; `InodeOutOfRange` indicates an internal bug in the sweep.
#[derive(Debug, Error)]
pub enum E2rError {
    #[error("I/O failed at offset {offset} (len {len}): {source}")]
    Io {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt superblock: field {field} has implausible value {value:#x}")]
    CorruptSuperblock { field: &'static str, value: u64 },

    #[error("inode {0} out of range")]
    InodeOutOfRange(u32),

    #[error("invalid on-disk format: {0}")]
    Format(String),
}

impl E2rError {
    /// Wrap an OS error with the positioned-I/O context it occurred at.
    #[must_use]
    pub fn io_at(offset: u64, len: usize, source: std::io::Error) -> Self {
        Self::Io {
            offset,
            len,
            source,
        }
    }
}

/// Result alias using `E2rError`.
pub type Result<T> = std::result::Result<T, E2rError>;
