//! Hash primitives used throughout the node.
//!
//! Keccak-256 identifies chain objects (transactions, headers, merkle
//! nodes); SHA3-256 identifies protocol messages and signature payloads.

use sha3::{Digest, Keccak256, Sha3_256};

use crate::entities::Hash;

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-256 of `data`.
pub fn sha3_256(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over the concatenation of two hashes.
///
/// This is the proof-chain link function: `root_n = mix_hash(root_{n-1},
/// tx_root_n)`.
pub fn mix_hash(first: &Hash, second: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(first);
    data[32..].copy_from_slice(second);
    keccak256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_known_answer() {
        // keccak256("") is a fixed constant.
        let h = keccak256(b"");
        assert_eq!(
            hex::encode(h),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn mix_hash_is_order_sensitive() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        assert_ne!(mix_hash(&a, &b), mix_hash(&b, &a));
    }

    #[test]
    fn sha3_differs_from_keccak() {
        assert_ne!(sha3_256(b"x"), keccak256(b"x"));
    }
}
