//! Binary merkle root derivation.
//!
//! Leaves are 32-byte item digests; interior nodes are
//! `keccak256(left ‖ right)`, with an odd tail promoted unchanged.

use crate::entities::Hash;
use crate::hashing::{keccak256, mix_hash};

/// Root of the empty list: Keccak-256 of the empty string.
pub const EMPTY_ROOT: Hash = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
];

/// Anything that can stand as a merkle leaf.
pub trait MerkleItem {
    fn merkle_leaf(&self) -> Hash;
}

/// Derive the merkle root over a list of items.
pub fn derive_root<T: MerkleItem>(items: &[T]) -> Hash {
    let mut level: Vec<Hash> = items.iter().map(MerkleItem::merkle_leaf).collect();
    if level.is_empty() {
        return EMPTY_ROOT;
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(mix_hash(left, right)),
                [odd] => next.push(*odd),
                _ => unreachable!(),
            }
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf(Hash);

    impl MerkleItem for Leaf {
        fn merkle_leaf(&self) -> Hash {
            self.0
        }
    }

    fn leaf(b: u8) -> Leaf {
        Leaf(keccak256(&[b]))
    }

    #[test]
    fn empty_list_has_fixed_root() {
        let items: Vec<Leaf> = vec![];
        assert_eq!(derive_root(&items), EMPTY_ROOT);
        assert_eq!(EMPTY_ROOT, keccak256(b""));
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = leaf(1);
        let expected = l.merkle_leaf();
        assert_eq!(derive_root(&[l]), expected);
    }

    #[test]
    fn pair_root_mixes_in_order() {
        let (a, b) = (leaf(1), leaf(2));
        let expected = mix_hash(&a.merkle_leaf(), &b.merkle_leaf());
        assert_eq!(derive_root(&[a, b]), expected);
    }

    #[test]
    fn root_depends_on_order() {
        let forward = derive_root(&[leaf(1), leaf(2), leaf(3)]);
        let reversed = derive_root(&[leaf(3), leaf(2), leaf(1)]);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn odd_tail_is_promoted() {
        // With three leaves the last one pairs against the mixed first pair.
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let ab = mix_hash(&a.merkle_leaf(), &b.merkle_leaf());
        let expected = mix_hash(&ab, &c.merkle_leaf());
        assert_eq!(derive_root(&[a, b, c]), expected);
    }
}
