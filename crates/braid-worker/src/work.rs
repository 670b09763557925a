//! The per-round working set.

use std::time::Instant;

use braid_mempool::PoolTx;
use braid_storage::StateDb;
use braid_types::{Block, Header, ProofState, Receipt, ReceiptStatus, Transaction};
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::WorkerResult;

/// Phase of the local round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoundState {
    Idle = 0,
    PostMining = 1,
    Mining = 2,
}

impl RoundState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::PostMining,
            2 => Self::Mining,
            _ => Self::Idle,
        }
    }
}

/// One candidate block under construction.
///
/// Owned by its round until it reaches the unconfirmed tracker; after the
/// quorum verdict it travels, read-only, through the commit queue and is
/// dropped once written (or rolled back).
pub struct Work {
    /// Local ticket binding this round to its drained transactions in the
    /// pool's working map.
    pub id: u64,
    pub header: Header,
    pub state: StateDb,
    pub txs: Vec<PoolTx>,
    pub receipts: Vec<Receipt>,
    pub states: Vec<ProofState>,
    pub created_at: Instant,
    pub confirmed: bool,
    /// Receives the sealed block from the parallel finalize task.
    pub gen_rx: Option<oneshot::Receiver<WorkerResult<Block>>>,
    /// Set once generation finished; what the commit writer persists.
    pub block: Option<Block>,
}

impl Work {
    pub fn new(id: u64, header: Header, state: StateDb, states: Vec<ProofState>) -> Self {
        Self {
            id,
            header,
            state,
            txs: Vec::new(),
            receipts: Vec::new(),
            states,
            created_at: Instant::now(),
            confirmed: false,
            gen_rx: None,
            block: None,
        }
    }

    /// Run every drained transaction through the executor. Failures revert
    /// their state snapshot and drop the transaction from the block (it
    /// stays in the pool's working set until the round ends).
    pub fn commit_transactions(&mut self, txs: Vec<PoolTx>) {
        for tx in txs {
            let snapshot = self.state.snapshot();
            match apply_transaction(&mut self.state, &self.header, &tx) {
                Ok(receipt) => {
                    self.txs.push(tx);
                    self.receipts.push(receipt);
                }
                Err(err) => {
                    self.state.revert_to(snapshot);
                    debug!(tx_hash = %hex::encode(tx.hash()), %err, "transaction skipped");
                }
            }
        }
    }

    /// Owned copies of the round's transactions, for the proof message and
    /// the block body.
    pub fn owned_txs(&self) -> Vec<Transaction> {
        self.txs.iter().map(|tx| Transaction::clone(tx)).collect()
    }
}

/// Apply one transaction to the state.
///
/// Execution is not part of this milestone: the call never mutates state
/// and always yields a success receipt with an initial confirm count of
/// one (the emitter's own).
pub fn apply_transaction(
    _state: &mut StateDb,
    _header: &Header,
    tx: &Transaction,
) -> WorkerResult<Receipt> {
    Ok(Receipt {
        status: ReceiptStatus::Success,
        tx_hash: tx.hash(),
        confirm_count: 1,
    })
}
