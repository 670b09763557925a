//! Chain entities.
//!
//! A braidchain transaction is an opaque payload blob; its identity is the
//! Keccak-256 of the encoded payload, cached after first use. The `forward`
//! flag ("already propagated, do not re-broadcast") lives outside the
//! encoded form, so it can never perturb the hash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::errors::CodecError;
use crate::hashing::keccak256;
use crate::merkle::MerkleItem;

/// A 32-byte hash.
pub type Hash = [u8; 32];

/// A 20-byte address derived from a secp256k1 public key.
pub type Address = [u8; 20];

/// Role a remote peer plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// A mining peer: emits proofs and votes on others'.
    MineNode,
    /// A bootstrap peer: relays discovery only, never mine-traffic.
    BootNode,
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// An opaque transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct Transaction {
    payload: Vec<u8>,
    /// Propagation marker, excluded from serialization and hashing.
    #[serde(skip)]
    forward: AtomicBool,
    #[serde(skip)]
    hash: OnceLock<Hash>,
}

impl Transaction {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            forward: AtomicBool::new(false),
            hash: OnceLock::new(),
        }
    }

    /// The transaction identity: Keccak-256 of the encoded payload.
    /// Computed once and cached; independent of the forward flag.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| {
            let enc = bincode::serialize(&self.payload).expect("payload always encodes");
            keccak256(&enc)
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Approximate encoded size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len() + 8
    }

    pub fn is_forward(&self) -> bool {
        self.forward.load(Ordering::Relaxed)
    }

    pub fn set_forward(&self, forward: bool) {
        self.forward.store(forward, Ordering::Relaxed);
    }
}

impl Clone for Transaction {
    fn clone(&self) -> Self {
        let cloned = Self {
            payload: self.payload.clone(),
            forward: AtomicBool::new(self.is_forward()),
            hash: OnceLock::new(),
        };
        if let Some(h) = self.hash.get() {
            let _ = cloned.hash.set(*h);
        }
        cloned
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for Transaction {}

impl MerkleItem for Transaction {
    fn merkle_leaf(&self) -> Hash {
        self.hash()
    }
}

// =============================================================================
// HEADER / BLOCK
// =============================================================================

/// A block header.
///
/// `proof_hash` is this miner's per-round proof digest
/// (`mix_hash(parent.proof_hash, tx_root)`); `proof_root` is the merkle root
/// of the per-peer proof states carried in the body.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Header {
    pub parent_hash: Hash,
    pub coinbase: Address,
    pub proof_hash: Hash,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub proof_root: Hash,
    pub difficulty: u64,
    pub number: u64,
    /// Unix timestamp in milliseconds.
    pub time_ms: u64,
    /// Vanity prefix plus seal signature suffix.
    pub extra: Vec<u8>,
}

impl Header {
    /// Keccak-256 of the encoded header (all fields, seal included).
    pub fn hash(&self) -> Hash {
        let enc = bincode::serialize(self).expect("header always encodes");
        keccak256(&enc)
    }

    /// The hash a sealer signs: the header with the seal bytes zeroed.
    pub fn seal_hash(&self, extra_vanity: usize) -> Hash {
        let mut unsealed = self.clone();
        unsealed.extra.truncate(extra_vanity);
        unsealed.hash()
    }
}

/// Everything in a block besides the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockBody {
    pub txs: Vec<Transaction>,
    pub proofs: Vec<ProofState>,
}

/// A sealed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: Header,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: Header, txs: Vec<Transaction>, proofs: Vec<ProofState>) -> Self {
        Self {
            header,
            body: BlockBody { txs, proofs },
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn proof_hash(&self) -> Hash {
        self.header.proof_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.txs
    }
}

// =============================================================================
// RECEIPT
// =============================================================================

/// Outcome of executing a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Failed,
    Success,
}

/// Execution receipt.
///
/// Only `status` is consensus; `confirm_count` is a local tally incremented
/// as peers confirm blocks containing the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub tx_hash: Hash,
    pub confirm_count: u64,
}

impl Receipt {
    pub fn new(status: ReceiptStatus, tx_hash: Hash) -> Self {
        Self {
            status,
            tx_hash,
            confirm_count: 0,
        }
    }

    /// The consensus byte encoding of the status: `Failed` is the empty
    /// string, `Success` is the single byte `0x01`.
    pub fn status_bytes(&self) -> &'static [u8] {
        match self.status {
            ReceiptStatus::Failed => &[],
            ReceiptStatus::Success => &[0x01],
        }
    }

    /// Inverse of [`status_bytes`](Self::status_bytes); any other byte
    /// string is an error.
    pub fn status_from_bytes(bytes: &[u8]) -> Result<ReceiptStatus, CodecError> {
        match bytes {
            [] => Ok(ReceiptStatus::Failed),
            [0x01] => Ok(ReceiptStatus::Success),
            other => Err(CodecError::InvalidReceiptStatus(hex::encode(other))),
        }
    }
}

impl MerkleItem for Receipt {
    fn merkle_leaf(&self) -> Hash {
        self.tx_hash
    }
}

// =============================================================================
// PROOF STATE
// =============================================================================

/// The latest verified endpoint of one peer's proof chain: peer `addr`
/// emitted digest `root` at height `num`.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofState {
    #[serde_as(as = "Bytes")]
    pub addr: Address,
    pub root: Hash,
    pub num: u64,
}

impl MerkleItem for ProofState {
    fn merkle_leaf(&self) -> Hash {
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_independent_of_forward_flag() {
        let tx = Transaction::new(vec![1, 2, 3]);
        let before = tx.hash();
        tx.set_forward(true);
        assert_eq!(tx.hash(), before);
        tx.set_forward(false);
        assert_eq!(tx.hash(), before);
    }

    #[test]
    fn tx_roundtrip_ignores_forward() {
        let tx = Transaction::new(vec![9; 40]);
        tx.set_forward(true);
        let bytes = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
        // The flag does not survive the wire.
        assert!(!decoded.is_forward());
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn header_hash_changes_with_fields() {
        let mut h = Header::default();
        let h0 = h.hash();
        h.number = 7;
        assert_ne!(h.hash(), h0);
    }

    #[test]
    fn seal_hash_ignores_seal_bytes() {
        let vanity = 32;
        let mut a = Header {
            extra: vec![0u8; vanity],
            ..Default::default()
        };
        let unsealed = a.seal_hash(vanity);
        a.extra.extend_from_slice(&[0xAB; 65]);
        assert_eq!(a.seal_hash(vanity), unsealed);
        assert_ne!(a.hash(), unsealed);
    }

    #[test]
    fn receipt_status_bytes_are_exact() {
        let ok = Receipt::new(ReceiptStatus::Success, [0; 32]);
        let bad = Receipt::new(ReceiptStatus::Failed, [0; 32]);
        assert_eq!(ok.status_bytes(), &[0x01]);
        assert_eq!(bad.status_bytes(), &[] as &[u8]);
        assert_eq!(
            Receipt::status_from_bytes(&[]).unwrap(),
            ReceiptStatus::Failed
        );
        assert_eq!(
            Receipt::status_from_bytes(&[0x01]).unwrap(),
            ReceiptStatus::Success
        );
        assert!(Receipt::status_from_bytes(&[0x02]).is_err());
        assert!(Receipt::status_from_bytes(&[0x01, 0x00]).is_err());
    }
}
