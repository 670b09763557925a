//! Storage error kinds.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying key-value engine failed.
    #[error("kv store failure: {0}")]
    Backend(String),

    /// A stored row failed to decode.
    #[error("corrupt row under key {key}: {reason}")]
    CorruptRow { key: String, reason: String },

    /// A row that must exist is missing (for example the canonical head
    /// after genesis bootstrap).
    #[error("missing row: {0}")]
    Missing(String),

    /// A block write was rejected by the chain store.
    #[error("chain write failed: {0}")]
    WriteChainFailed(String),
}

impl StorageError {
    pub fn corrupt(key: impl AsRef<[u8]>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptRow {
            key: hex::encode(key.as_ref()),
            reason: reason.to_string(),
        }
    }
}
