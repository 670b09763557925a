//! # Braid Crypto
//!
//! Recoverable ECDSA over secp256k1, plus the address derivation every
//! protocol surface relies on.
//!
//! ## Signature format
//!
//! All protocol signatures are 65 bytes, `r(32) ‖ s(32) ‖ v(1)` with
//! `v ∈ {27, 28}`. S values are normalized to the lower half of the curve
//! order; high-S signatures are rejected on verification.
//!
//! ## Identity
//!
//! An address is `keccak256(uncompressed_pubkey[1..])[12..]`: the last 20
//! bytes of the Keccak-256 of the public key without its `0x04` prefix.

pub mod ecdsa;
pub mod errors;
pub mod signer;

pub use ecdsa::{
    address_from_pubkey, is_low_s, recover_address, recover_pubkey, Keypair, SIGNATURE_LEN,
};
pub use errors::CryptoError;
pub use signer::ProofSigner;
