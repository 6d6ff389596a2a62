//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying SQL engine reported an error.
    #[error("sql engine error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A savepoint label contained characters outside `[A-Za-z0-9_]`.
    #[error("invalid savepoint label: {label:?}")]
    InvalidLabel {
        /// The rejected label.
        label: String,
    },

    /// A serialized engine image could not be produced or restored.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Description of the failure.
        message: String,
    },

    /// A blob-store key contained an empty or traversing path component.
    #[error("invalid blob key: {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },
}

impl StorageError {
    /// Creates an invalid label error.
    pub fn invalid_label(label: impl Into<String>) -> Self {
        Self::InvalidLabel {
            label: label.into(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }
}
