//! Per-peer proof chain endpoints.
//!
//! One row per peer under `peer/<addr>`, holding the latest verified
//! `(num, root)`. Writes happen only from the per-sender proof handler, so
//! the height is monotone without extra locking; the row survives restarts
//! and losing it merely forces a re-sync through state queries.

use std::sync::Arc;

use braid_types::{Address, ProofState};

use crate::errors::StorageResult;
use crate::kv::{decode_row, KeyValueStore};
use crate::schema;

/// Access to a peer's latest verified proof state.
pub trait ProofStore: Send + Sync {
    fn peer_proof(&self, addr: &Address) -> StorageResult<Option<ProofState>>;

    fn write_peer_proof(&self, state: &ProofState) -> StorageResult<()>;
}

/// [`ProofStore`] over the node's key-value engine.
pub struct PeerProofStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PeerProofStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Every peer state currently persisted.
    pub fn all(&self) -> StorageResult<Vec<ProofState>> {
        self.kv
            .prefix_scan(b"peer/")?
            .into_iter()
            .map(|(key, value)| decode_row(&key, &value))
            .collect()
    }
}

impl ProofStore for PeerProofStore {
    fn peer_proof(&self, addr: &Address) -> StorageResult<Option<ProofState>> {
        let key = schema::peer_proof_key(addr);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode_row(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn write_peer_proof(&self, state: &ProofState) -> StorageResult<()> {
        let key = schema::peer_proof_key(&state.addr);
        let value = bincode::serialize(state).expect("proof state always encodes");
        self.kv.put(&key, &value)
    }
}
