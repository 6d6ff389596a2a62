//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The database has been closed; no further calls are accepted.
    #[error("database is closed")]
    Closed,

    /// The persisted engine image could not be restored at init.
    #[error("engine load failed: {message}")]
    EngineLoadFailed {
        /// Description of the failure.
        message: String,
    },

    /// Storage or SQL engine error.
    #[error("storage error: {0}")]
    Storage(#[from] roomdb_storage::StorageError),

    /// Wire encoding or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] roomdb_protocol::ProtocolError),

    /// Operation requires a live room connection.
    #[error("not connected to a room")]
    NotConnected,

    /// The transport reported a send or connect failure.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

impl SyncError {
    /// Creates an engine load failure.
    pub fn engine_load_failed(message: impl Into<String>) -> Self {
        Self::EngineLoadFailed {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Closed.to_string(), "database is closed");
        assert_eq!(
            SyncError::engine_load_failed("bad image").to_string(),
            "engine load failed: bad image"
        );
        assert_eq!(
            SyncError::NotConnected.to_string(),
            "not connected to a room"
        );
    }
}
