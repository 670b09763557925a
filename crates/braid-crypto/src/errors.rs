//! Crypto error kinds.

use braid_types::Address;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Signature bytes are not 65 bytes of `r ‖ s ‖ v`, or r/s fall outside
    /// the valid scalar range.
    #[error("malformed signature")]
    InvalidSignature,

    /// S value sits in the upper half of the curve order.
    #[error("malleable signature (high S)")]
    MalleableSignature,

    /// Recovery id is not one of 0, 1, 27, 28.
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    /// Public key recovery failed for the given digest.
    #[error("pubkey recovery failed")]
    RecoveryFailed,

    /// Recovered key did not decode to a valid uncompressed point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// A private key could not be parsed.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// The recovered signer differs from the expected address.
    #[error("signer mismatch: expected {}, got {}", hex::encode(expected), hex::encode(actual))]
    SignerMismatch { expected: Address, actual: Address },

    /// No signing key is configured.
    #[error("no signing key configured")]
    NoSigner,
}
