//! Ports of the mempool.

use std::sync::Arc;

use braid_types::Transaction;

/// What the mining worker needs from the pool.
pub trait TxSource: Send + Sync {
    /// Atomically drain up to `max` pending transactions into the working
    /// set of `work_id`.
    fn take_pending(&self, work_id: u64, max: usize) -> Vec<Arc<Transaction>>;

    /// Number of transactions currently pending.
    fn pending_count(&self) -> usize;

    /// Release the working set of `work_id`: on success its transactions
    /// move to on-chain at `block_number`, otherwise back to pending.
    fn work_ended(&self, work_id: u64, block_number: u64, succeeded: bool);

    /// Best-effort ingest of transactions carried by a peer's proof.
    fn add_remote_txs(&self, txs: Vec<Transaction>);
}

/// Chain-head height, needed by the on-chain eviction pass.
pub trait HeadSource: Send + Sync {
    fn head_number(&self) -> u64;
}
