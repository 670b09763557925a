//! Recoverable ECDSA primitives.

use braid_types::{keccak256, Address, Hash};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroize;

use crate::errors::CryptoError;

/// Length of a recoverable signature: `r(32) ‖ s(32) ‖ v(1)`.
pub const SIGNATURE_LEN: usize = 65;

/// Half of the secp256k1 curve order, for the low-S check.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B,
    0x20, 0xA0,
];

/// A secp256k1 keypair. Secret material is zeroized on drop.
pub struct Keypair {
    signing_key: SigningKey,
    address: Address,
}

impl Keypair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Restore a keypair from 32 secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_from_pubkey(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The address derived from this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest, returning the 65-byte recoverable signature.
    pub fn sign_digest(&self, digest: &Hash) -> Result<Vec<u8>, CryptoError> {
        let (sig, recid): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&sig.to_bytes());
        out.push(recid.to_byte() + 27);
        Ok(out)
    }

    /// Secret key bytes, for keystore persistence.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &hex::encode(self.address))
            .finish_non_exhaustive()
    }
}

/// Derive the address for a verifying key.
pub fn address_from_pubkey(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    addr
}

/// Recover the uncompressed public key (65 bytes, `0x04 ‖ x ‖ y`) that
/// signed `digest`.
pub fn recover_pubkey(digest: &Hash, signature: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (sig, recid) = split_signature(signature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(key.to_encoded_point(false).as_bytes().to_vec())
}

/// Recover the signer address for `digest`.
pub fn recover_address(digest: &Hash, signature: &[u8]) -> Result<Address, CryptoError> {
    let (sig, recid) = split_signature(signature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_from_pubkey(&key))
}

/// Constant-time check that `s` is strictly below half the curve order.
pub fn is_low_s(s: &[u8; 32]) -> bool {
    let mut less = Choice::from(0u8);
    let mut greater = Choice::from(0u8);
    for i in 0..32 {
        let not_decided = !(less | greater);
        let byte_less = Choice::from(u8::from(s[i] < SECP256K1_HALF_ORDER[i]));
        let byte_greater = Choice::from(u8::from(s[i] > SECP256K1_HALF_ORDER[i]));
        less |= not_decided & byte_less;
        greater |= not_decided & byte_greater;
    }
    less.into()
}

fn split_signature(signature: &[u8]) -> Result<(Signature, RecoveryId), CryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature);
    }
    let mut s = [0u8; 32];
    s.copy_from_slice(&signature[32..64]);
    let zero = [0u8; 32];
    if bool::from(s.ct_eq(&zero)) {
        return Err(CryptoError::InvalidSignature);
    }
    if !is_low_s(&s) {
        return Err(CryptoError::MalleableSignature);
    }
    let sig =
        Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let recid = parse_recovery_id(signature[64])?;
    Ok((sig, recid))
}

fn parse_recovery_id(v: u8) -> Result<RecoveryId, CryptoError> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        other => return Err(CryptoError::InvalidRecoveryId(other)),
    };
    RecoveryId::try_from(id).map_err(|_| CryptoError::InvalidRecoveryId(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::sha3_256;

    #[test]
    fn sign_then_recover_address() {
        let key = Keypair::generate();
        let digest = sha3_256(b"round one");
        let sig = key.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert_eq!(recover_address(&digest, &sig).unwrap(), key.address());
    }

    #[test]
    fn recovered_pubkey_is_uncompressed() {
        let key = Keypair::generate();
        let digest = sha3_256(b"data");
        let sig = key.sign_digest(&digest).unwrap();
        let pubkey = recover_pubkey(&digest, &sig).unwrap();
        assert_eq!(pubkey.len(), 65);
        assert_eq!(pubkey[0], 0x04);
    }

    #[test]
    fn wrong_digest_recovers_different_address() {
        let key = Keypair::generate();
        let sig = key.sign_digest(&sha3_256(b"one")).unwrap();
        let recovered = recover_address(&sha3_256(b"two"), &sig);
        // Recovery succeeds but yields some other signer.
        if let Ok(addr) = recovered {
            assert_ne!(addr, key.address());
        }
    }

    #[test]
    fn truncated_signature_rejected() {
        let digest = sha3_256(b"x");
        assert_eq!(
            recover_address(&digest, &[0u8; 64]),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn bad_recovery_id_rejected() {
        let key = Keypair::generate();
        let digest = sha3_256(b"x");
        let mut sig = key.sign_digest(&digest).unwrap();
        sig[64] = 5;
        assert_eq!(
            recover_address(&digest, &sig),
            Err(CryptoError::InvalidRecoveryId(5))
        );
    }

    #[test]
    fn high_s_rejected() {
        let key = Keypair::generate();
        let digest = sha3_256(b"x");
        let mut sig = key.sign_digest(&digest).unwrap();
        // Force S into the upper half by flipping its top byte high.
        sig[32] = 0xFF;
        assert!(matches!(
            recover_address(&digest, &sig),
            Err(CryptoError::MalleableSignature) | Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn keypair_roundtrip_bytes() {
        let key = Keypair::generate();
        let restored = Keypair::from_bytes(key.to_bytes()).unwrap();
        assert_eq!(restored.address(), key.address());
    }

    #[test]
    fn deterministic_signatures() {
        let key = Keypair::from_bytes([0xAB; 32]).unwrap();
        let digest = sha3_256(b"same input");
        assert_eq!(
            key.sign_digest(&digest).unwrap(),
            key.sign_digest(&digest).unwrap()
        );
    }

    #[test]
    fn half_order_boundary() {
        assert!(!is_low_s(&SECP256K1_HALF_ORDER));
        let mut below = SECP256K1_HALF_ORDER;
        below[31] -= 1;
        assert!(is_low_s(&below));
    }
}
