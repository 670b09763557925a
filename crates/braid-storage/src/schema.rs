//! Key families of the chain database.
//!
//! | Prefix | Row |
//! |--------|-----|
//! | `h/<hash>` | header |
//! | `b/<hash>` | block body |
//! | `r/<hash>` | receipts |
//! | `n/<number>` | canonical hash at height |
//! | `l/<txhash>` | transaction lookup entry |
//! | `peer/<addr>` | latest verified proof state for a peer |
//! | `head` | hash of the canonical head |
//! | `version` | schema version |

use braid_types::{Address, Hash};

pub const HEAD_KEY: &[u8] = b"head";
pub const VERSION_KEY: &[u8] = b"version";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

pub fn header_key(hash: &Hash) -> Vec<u8> {
    prefixed(b"h/", hash)
}

pub fn body_key(hash: &Hash) -> Vec<u8> {
    prefixed(b"b/", hash)
}

pub fn receipts_key(hash: &Hash) -> Vec<u8> {
    prefixed(b"r/", hash)
}

pub fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.extend_from_slice(b"n/");
    key.extend_from_slice(&number.to_be_bytes());
    key
}

pub fn tx_lookup_key(tx_hash: &Hash) -> Vec<u8> {
    prefixed(b"l/", tx_hash)
}

pub fn peer_proof_key(addr: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(25);
    key.extend_from_slice(b"peer/");
    key.extend_from_slice(addr);
    key
}

fn prefixed(prefix: &[u8], hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + hash.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(hash);
    key
}
