//! Store error types.

use std::io;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry stored under the key.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The key is empty or does not map to a plain relative path.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Map an I/O error for `key`, turning `NotFound` into
    /// [`StoreError::NotFound`].
    pub(crate) fn from_io(key: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Io(err)
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
