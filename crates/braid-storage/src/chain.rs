//! The canonical chain store.

use std::sync::Arc;

use braid_types::{Block, BlockBody, Hash, Header, Receipt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{StorageError, StorageResult};
use crate::kv::{decode_row, BatchOperation, KeyValueStore};
use crate::ports::{BlockReceipts, ChainReader, ChainWriter};
use crate::schema;
use crate::state::StateDb;

/// Storage row of one receipt. The status field carries the exact
/// consensus bytes: empty for `Failed`, `0x01` for `Success`.
#[derive(Debug, Serialize, Deserialize)]
struct ReceiptRow {
    status: Vec<u8>,
    confirm_count: u64,
    tx_hash: Hash,
}

/// Row locating a transaction inside the chain.
#[derive(Debug, Serialize, Deserialize)]
struct TxLookupRow {
    block_hash: Hash,
    number: u64,
    index: u64,
}

/// Canonical chain over a [`KeyValueStore`].
///
/// The commit queue is the single writer; readers may observe any
/// consistent snapshot.
pub struct ChainStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ChainStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Bootstrap the genesis block if the store is empty; returns the
    /// genesis header either way. `proof_seed` becomes the genesis
    /// `proof_hash`, the anchor every peer's proof chain hangs from.
    pub fn ensure_genesis(&self, proof_seed: Hash) -> StorageResult<Header> {
        if let Some(head) = self.kv.get(schema::HEAD_KEY)? {
            let hash: Hash = decode_row(schema::HEAD_KEY, &head)?;
            return self
                .header_by_hash(&hash)?
                .ok_or_else(|| StorageError::Missing("head header".into()));
        }
        let genesis = Header {
            proof_hash: proof_seed,
            difficulty: 1,
            ..Default::default()
        };
        let hash = genesis.hash();
        let batch = vec![
            BatchOperation::put(schema::header_key(&hash), encode(&genesis)),
            BatchOperation::put(schema::body_key(&hash), encode(&BlockBody::default())),
            BatchOperation::put(schema::canonical_key(0), encode(&hash)),
            BatchOperation::put(schema::HEAD_KEY, encode(&hash)),
            BatchOperation::put(schema::VERSION_KEY, encode(&schema::SCHEMA_VERSION)),
        ];
        self.kv.atomic_batch_write(batch)?;
        info!(hash = %hex::encode(hash), "genesis written");
        Ok(genesis)
    }

    pub fn header_by_hash(&self, hash: &Hash) -> StorageResult<Option<Header>> {
        let key = schema::header_key(hash);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode_row(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn body_by_hash(&self, hash: &Hash) -> StorageResult<Option<BlockBody>> {
        let key = schema::body_key(hash);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode_row(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn receipts_by_hash(&self, hash: &Hash) -> StorageResult<Option<Vec<Receipt>>> {
        let key = schema::receipts_key(hash);
        let Some(bytes) = self.kv.get(&key)? else {
            return Ok(None);
        };
        let rows: Vec<ReceiptRow> = decode_row(&key, &bytes)?;
        rows.into_iter()
            .map(|row| {
                let status = Receipt::status_from_bytes(&row.status)
                    .map_err(|e| StorageError::corrupt(&key, e))?;
                Ok(Receipt {
                    status,
                    tx_hash: row.tx_hash,
                    confirm_count: row.confirm_count,
                })
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(Some)
    }

    pub fn canonical_hash(&self, number: u64) -> StorageResult<Option<Hash>> {
        let key = schema::canonical_key(number);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode_row(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn receipt_rows(receipts: &[Receipt]) -> Vec<ReceiptRow> {
        receipts
            .iter()
            .map(|r| ReceiptRow {
                status: r.status_bytes().to_vec(),
                confirm_count: r.confirm_count,
                tx_hash: r.tx_hash,
            })
            .collect()
    }
}

impl ChainReader for ChainStore {
    fn current_header(&self) -> StorageResult<Header> {
        let head = self
            .kv
            .get(schema::HEAD_KEY)?
            .ok_or_else(|| StorageError::Missing("canonical head".into()))?;
        let hash: Hash = decode_row(schema::HEAD_KEY, &head)?;
        self.header_by_hash(&hash)?
            .ok_or_else(|| StorageError::Missing("head header".into()))
    }

    fn header_by_number(&self, number: u64) -> StorageResult<Option<Header>> {
        match self.canonical_hash(number)? {
            Some(hash) => self.header_by_hash(&hash),
            None => Ok(None),
        }
    }

    fn state_at(&self, root: Hash) -> StorageResult<StateDb> {
        Ok(StateDb::at(root))
    }

    fn block_receipts_by_tx(&self, tx_hash: &Hash) -> StorageResult<Option<BlockReceipts>> {
        let key = schema::tx_lookup_key(tx_hash);
        let Some(bytes) = self.kv.get(&key)? else {
            return Ok(None);
        };
        let row: TxLookupRow = decode_row(&key, &bytes)?;
        let Some(receipts) = self.receipts_by_hash(&row.block_hash)? else {
            return Ok(None);
        };
        Ok(Some(BlockReceipts {
            block_hash: row.block_hash,
            number: row.number,
            receipts,
        }))
    }
}

impl ChainWriter for ChainStore {
    fn write_block_and_state(
        &self,
        block: &Block,
        receipts: &[Receipt],
        state: &StateDb,
    ) -> StorageResult<()> {
        let hash = block.hash();
        let number = block.number();
        // The stub executor never moves the state root; commit anyway so a
        // real executor slots in without touching this path.
        let _post_root = state.commit();

        let mut batch = Vec::with_capacity(5 + block.transactions().len());
        batch.push(BatchOperation::put(
            schema::header_key(&hash),
            encode(&block.header),
        ));
        batch.push(BatchOperation::put(
            schema::body_key(&hash),
            encode(&block.body),
        ));
        batch.push(BatchOperation::put(
            schema::receipts_key(&hash),
            encode(&Self::receipt_rows(receipts)),
        ));
        batch.push(BatchOperation::put(schema::canonical_key(number), encode(&hash)));
        batch.push(BatchOperation::put(schema::HEAD_KEY, encode(&hash)));
        for (index, tx) in block.transactions().iter().enumerate() {
            batch.push(BatchOperation::put(
                schema::tx_lookup_key(&tx.hash()),
                encode(&TxLookupRow {
                    block_hash: hash,
                    number,
                    index: index as u64,
                }),
            ));
        }
        self.kv
            .atomic_batch_write(batch)
            .map_err(|e| StorageError::WriteChainFailed(e.to_string()))
    }

    fn write_block_receipts(&self, updates: Vec<BlockReceipts>) -> StorageResult<()> {
        let batch = updates
            .iter()
            .map(|u| {
                BatchOperation::put(
                    schema::receipts_key(&u.block_hash),
                    encode(&Self::receipt_rows(&u.receipts)),
                )
            })
            .collect();
        self.kv.atomic_batch_write(batch)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("chain row always encodes")
}
