//! # Braid Types
//!
//! Core entities and wire messages shared across the braidchain node.
//!
//! ## Clusters
//!
//! - **Chain**: [`Transaction`], [`Header`], [`Block`], [`Receipt`]
//! - **Proof chain**: [`ProofState`], [`WorkProof`], [`ProofConfirm`]
//! - **Wire**: [`WorkProofMsg`], [`ConfirmMsg`], [`QueryStateMsg`],
//!   [`ResponseStateMsg`], [`NetMessage`]
//!
//! Every message carries a detached 65-byte recoverable signature over the
//! inner payload's `data()` bytes; the sender identity is always recovered,
//! never trusted from the envelope.

pub mod entities;
pub mod errors;
pub mod hashing;
pub mod merkle;
pub mod messages;

pub use entities::{
    Address, Block, BlockBody, Hash, Header, NodeRole, ProofState, Receipt, ReceiptStatus,
    Transaction,
};
pub use errors::CodecError;
pub use hashing::{keccak256, mix_hash, sha3_256};
pub use merkle::{derive_root, MerkleItem, EMPTY_ROOT};
pub use messages::{
    ConfirmMsg, NetMessage, ProofConfirm, ProofSignature, QueryState, QueryStateMsg, ResponseState,
    ResponseStateMsg, WorkProof, WorkProofMsg,
};
