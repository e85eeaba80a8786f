//! Error types shared by the stores and the lock manager.

use std::path::PathBuf;

/// Error from store and lock operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Caller supplied a malformed identifier or allow entry.
    #[error("invalid identifier: {0}")]
    Validation(String),

    /// No pending pairing request matches the code.
    #[error("no pending pairing request for code {0}")]
    NotFound(String),

    /// A request matched the code but its TTL has elapsed.
    #[error("pairing code {0} has expired; ask the sender to message again")]
    Expired(String),

    /// The chat scope already holds the maximum number of pending requests.
    #[error("chat {chat} already has {max} pending pairing requests")]
    QuotaExceeded { chat: String, max: usize },

    /// Mutual exclusion could not be obtained within the bound.
    #[error("timed out waiting for lock {}", .0.display())]
    LockTimeout(PathBuf),

    /// The top-level store document is unparseable.
    #[error("store file {} is corrupt: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Could not draw a collision-free pairing code.
    #[error("could not generate a unique pairing code")]
    CodeGeneration,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
