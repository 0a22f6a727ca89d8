//! Error types for span-trie.

use thiserror::Error;

use crate::tree::Status;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or growing a tree.
///
/// Only [`Error::OutOfMemory`] can come out of an insert. The remaining
/// variants are raised while validating a configuration or mapping memory.
#[derive(Debug, Error)]
pub enum Error {
    #[error("arena exhausted: requested {requested} bytes, {available} bytes remaining")]
    OutOfMemory { requested: usize, available: usize },

    #[error("invalid alignment {0}: must be a power of two no smaller than 4")]
    InvalidAlignment(usize),

    #[error("invalid capacity {capacity}: must be between {min} and {max} bytes")]
    InvalidCapacity {
        capacity: usize,
        min: usize,
        max: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable status code reported for this error.
    pub fn status(&self) -> Status {
        Status::MemoryError
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }
}
