//! Worker error kinds.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Header extra-data lacks the 32-byte vanity prefix.
    #[error("extra-data vanity prefix missing")]
    MissingVanity,

    /// Header extra-data lacks the 65-byte seal suffix.
    #[error("extra-data seal signature missing")]
    MissingSignature,

    /// Header number is not parent + 1, or the parent is unknown.
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// Header number does not follow its parent.
    #[error("invalid block number")]
    InvalidNumber,

    /// Header timestamp precedes its parent's.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// A proof signature did not recover to the claimed sender over the
    /// expected chained digest.
    #[error("invalid proof")]
    InvalidProof,

    /// The user part of extra-data exceeds the allowed length.
    #[error("extra data too long: {got} > {max}")]
    ExtraTooLong { got: usize, max: usize },

    /// Waiting for a peer's state response timed out.
    #[error("peer state query timed out")]
    QueryTimeout,

    /// The commit queue refused the round (it is in the errored state).
    #[error("commit queue rolled back")]
    PendingRollback,

    /// The round was handed off without reaching its quorum.
    #[error("block proof not confirmed")]
    NotConfirmed,

    /// Block generation failed before the round could commit.
    #[error("block generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Crypto(#[from] braid_crypto::CryptoError),

    #[error(transparent)]
    Storage(#[from] braid_storage::StorageError),
}
