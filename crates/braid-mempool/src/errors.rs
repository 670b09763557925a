//! Mempool error kinds.

use braid_types::Hash;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxPoolError {
    /// Dedup hit: the hash is already known, queued, pending, or on chain.
    #[error("known transaction: {}", hex::encode(.0))]
    KnownTx(Hash),

    /// Every ingest slot was full; the sender may retry.
    #[error("ingest channels saturated")]
    IngressFull,

    /// The pool has been stopped.
    #[error("pool stopped")]
    Stopped,
}
