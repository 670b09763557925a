//! Narrow chain capabilities.
//!
//! Components hold only the capability they need: the round loop reads the
//! tip through [`ChainReader`], the commit writer appends through
//! [`ChainWriter`]. Both are implemented by [`ChainStore`] and can be
//! wrapped in tests to inject failures.
//!
//! [`ChainStore`]: crate::chain::ChainStore

use braid_types::{Block, Hash, Header, Receipt};

use crate::errors::StorageResult;
use crate::state::StateDb;

/// Receipts of one block together with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReceipts {
    pub block_hash: Hash,
    pub number: u64,
    pub receipts: Vec<Receipt>,
}

/// Read access to the canonical chain.
pub trait ChainReader: Send + Sync {
    /// Header of the canonical head.
    fn current_header(&self) -> StorageResult<Header>;

    /// Canonical header at `number`.
    fn header_by_number(&self, number: u64) -> StorageResult<Option<Header>>;

    /// State view at the given root.
    fn state_at(&self, root: Hash) -> StorageResult<StateDb>;

    /// Receipts of the block containing `tx_hash`, if on chain.
    fn block_receipts_by_tx(&self, tx_hash: &Hash) -> StorageResult<Option<BlockReceipts>>;
}

/// Append access to the canonical chain.
pub trait ChainWriter: Send + Sync {
    /// Atomically persist a block, its receipts, and the post-state, and
    /// advance the canonical head.
    fn write_block_and_state(
        &self,
        block: &Block,
        receipts: &[Receipt],
        state: &StateDb,
    ) -> StorageResult<()>;

    /// Atomically replace the receipt rows of the given blocks (used by the
    /// confirm-count batcher).
    fn write_block_receipts(&self, updates: Vec<BlockReceipts>) -> StorageResult<()>;
}
