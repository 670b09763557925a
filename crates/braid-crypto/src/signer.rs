//! The node's signing identity.

use braid_types::{sha3_256, Address, Hash, ProofSignature};

use crate::ecdsa::{recover_address, Keypair};
use crate::errors::CryptoError;

/// Signs every protocol payload with the node's coinbase key.
///
/// Two entry points mirror the two signing conventions on the wire:
/// message envelopes sign the SHA3-256 of their `data()` bytes
/// ([`sign_data`](Self::sign_data)); proof digests are already 32-byte
/// hashes and are signed directly ([`sign_digest`](Self::sign_digest)).
pub struct ProofSigner {
    keypair: Keypair,
}

impl ProofSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn random() -> Self {
        Self::new(Keypair::generate())
    }

    /// The coinbase address this signer represents.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Hash `data` with SHA3-256, then sign the digest.
    pub fn sign_data(&self, data: &[u8]) -> Result<ProofSignature, CryptoError> {
        self.sign_digest(&sha3_256(data))
    }

    /// Sign a 32-byte digest directly.
    pub fn sign_digest(&self, digest: &Hash) -> Result<ProofSignature, CryptoError> {
        Ok(ProofSignature(self.keypair.sign_digest(digest)?))
    }

    /// Recover the peer that signed `data` (the inverse of
    /// [`sign_data`](Self::sign_data)).
    pub fn recover_sender(data: &[u8], sign: &ProofSignature) -> Result<Address, CryptoError> {
        recover_address(&sha3_256(data), sign.as_bytes())
    }
}

impl std::fmt::Debug for ProofSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofSigner")
            .field("address", &hex::encode(self.address()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_data_roundtrip() {
        let signer = ProofSigner::random();
        let data = b"number and signature bytes".to_vec();
        let sig = signer.sign_data(&data).unwrap();
        assert_eq!(
            ProofSigner::recover_sender(&data, &sig).unwrap(),
            signer.address()
        );
    }

    #[test]
    fn different_signers_recover_differently() {
        let a = ProofSigner::random();
        let b = ProofSigner::random();
        let data = b"payload".to_vec();
        let sig = a.sign_data(&data).unwrap();
        assert_ne!(
            ProofSigner::recover_sender(&data, &sig).unwrap(),
            b.address()
        );
    }
}
