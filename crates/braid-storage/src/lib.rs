//! # Braid Storage
//!
//! Persistence for the braidchain node: an abstract [`KeyValueStore`] port
//! with atomic batch writes, the chain row schema, the [`ChainStore`]
//! holding the canonical chain, and the [`PeerProofStore`] recording the
//! latest verified proof-chain endpoint per peer.
//!
//! The on-disk engine is intentionally pluggable; the crate ships an
//! in-memory adapter and everything else is written against the port.

pub mod chain;
pub mod errors;
pub mod kv;
pub mod ports;
pub mod proofs;
pub mod schema;
pub mod state;

pub use chain::ChainStore;
pub use errors::{StorageError, StorageResult};
pub use kv::{BatchOperation, InMemoryKvStore, KeyValueStore};
pub use ports::{BlockReceipts, ChainReader, ChainWriter};
pub use proofs::{PeerProofStore, ProofStore};
pub use state::StateDb;
