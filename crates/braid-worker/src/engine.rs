//! The proof engine: header preparation and sanity, proof chain
//! generation/verification, block finalization and sealing.

use std::collections::HashSet;

use braid_crypto::{recover_address, ProofSigner};
use braid_types::{
    derive_root, mix_hash, Address, Block, Hash, Header, ProofState, Receipt, Transaction,
    WorkProof,
};
use tracing::debug;

use crate::config::StatePolicy;
use crate::errors::{WorkerError, WorkerResult};

/// Bytes of extra-data reserved for the vanity prefix.
pub const EXTRA_VANITY: usize = 32;

/// Bytes of extra-data reserved for the seal signature.
pub const EXTRA_SEAL: usize = 65;

/// Maximum user-supplied extra-data length.
pub const MAX_EXTRA_DATA: usize = 32;

/// Stateless engine functions over the proof chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProofEngine;

impl ProofEngine {
    /// Shape a freshly built header for mining: pad the extra-data to the
    /// vanity length, reserve the seal bytes, stamp time and difficulty.
    pub fn prepare_header(&self, header: &mut Header) {
        if header.extra.len() < EXTRA_VANITY {
            header.extra.resize(EXTRA_VANITY, 0);
        }
        header.extra.truncate(EXTRA_VANITY);
        header.extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.time_ms = unix_ms();
        header.difficulty = 1;
    }

    /// Sanity-check a candidate header against its parent.
    pub fn verify_header(&self, header: &Header, parent: Option<&Header>) -> WorkerResult<()> {
        if header.extra.len() < EXTRA_VANITY {
            return Err(WorkerError::MissingVanity);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(WorkerError::MissingSignature);
        }
        if header.number == 0 {
            // Genesis is the always-valid dead end.
            return Ok(());
        }
        let parent = parent.ok_or(WorkerError::UnknownAncestor)?;
        if parent.number + 1 != header.number {
            return Err(WorkerError::InvalidNumber);
        }
        if parent.hash() != header.parent_hash {
            return Err(WorkerError::UnknownAncestor);
        }
        if parent.time_ms > header.time_ms {
            return Err(WorkerError::InvalidTimestamp);
        }
        Ok(())
    }

    /// Build and sign this round's work proof, updating the header's tx
    /// root and proof hash.
    ///
    /// The proof digest chains off the parent's `proof_hash`:
    /// `proof_hash = keccak(parent.proof_hash ‖ tx_root)`.
    pub fn generate_proof(
        &self,
        signer: &ProofSigner,
        header: &mut Header,
        parent: &Header,
        txs: &[Transaction],
        states: &[ProofState],
    ) -> WorkerResult<WorkProof> {
        let last_root = parent.proof_hash;
        let tx_root = derive_root(txs);
        let proof_hash = mix_hash(&last_root, &tx_root);
        let sign = signer.sign_digest(&proof_hash)?;

        header.tx_root = tx_root;
        header.proof_hash = proof_hash;
        debug!(
            number = header.number,
            proof_hash = %hex::encode(proof_hash),
            "proof generated"
        );
        Ok(WorkProof {
            number: header.number,
            sign,
            txs: txs.to_vec(),
            states: states.to_vec(),
        })
    }

    /// Verify one chain step of a peer's proof: recompute the expected
    /// digest from our stored root and the proof's transactions, and check
    /// the signature recovers to the peer. Returns the new root on
    /// success.
    pub fn verify_proof(
        &self,
        addr: &Address,
        last_hash: &Hash,
        proof: &WorkProof,
    ) -> WorkerResult<Hash> {
        let tx_root = derive_root(&proof.txs);
        let expected = mix_hash(last_hash, &tx_root);
        let recovered = recover_address(&expected, proof.sign.as_bytes())
            .map_err(|_| WorkerError::InvalidProof)?;
        if recovered != *addr {
            debug!(
                peer = %hex::encode(addr),
                recovered = %hex::encode(recovered),
                "proof signer mismatch"
            );
            return Err(WorkerError::InvalidProof);
        }
        Ok(expected)
    }

    /// Quick re-check of a single chain link without signature recovery.
    pub fn verify_proof_quick(
        &self,
        last_hash: &Hash,
        tx_root: &Hash,
        new_hash: &Hash,
    ) -> WorkerResult<()> {
        if mix_hash(last_hash, tx_root) == *new_hash {
            Ok(())
        } else {
            Err(WorkerError::InvalidProof)
        }
    }

    /// Check the proof's state list against our own recent proof history.
    ///
    /// Under [`StatePolicy::Permissive`] every list passes, matching the
    /// behavior this scheme shipped with. Under [`StatePolicy::Strict`] a
    /// state entry claiming a root for us that we never emitted fails the
    /// proof, and a list that does not mention us at all fails too.
    pub fn verify_state(
        &self,
        policy: StatePolicy,
        coinbase: &Address,
        history: &HashSet<Hash>,
        proof: &WorkProof,
    ) -> bool {
        match policy {
            StatePolicy::Permissive => true,
            StatePolicy::Strict => proof
                .states
                .iter()
                .find(|state| state.addr == *coinbase)
                .is_some_and(|state| history.contains(&state.root)),
        }
    }

    /// Assemble the block for a finished round: commit the state, derive
    /// the outstanding roots, and bind body to header.
    pub fn finalize(
        &self,
        mut header: Header,
        state_root: Hash,
        txs: Vec<Transaction>,
        states: Vec<ProofState>,
        receipts: &[Receipt],
    ) -> Block {
        header.state_root = state_root;
        header.receipt_root = derive_root(receipts);
        header.proof_root = derive_root(&states);
        Block::new(header, txs, states)
    }

    /// Seal a block by signing its unsealed header hash into the extra
    /// seal slot.
    pub fn seal_block(&self, signer: &ProofSigner, mut block: Block) -> WorkerResult<Block> {
        let digest = block.header.seal_hash(EXTRA_VANITY);
        let sign = signer.sign_digest(&digest)?;
        let extra = &mut block.header.extra;
        if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(WorkerError::MissingSignature);
        }
        let seal_start = extra.len() - EXTRA_SEAL;
        extra[seal_start..].copy_from_slice(sign.as_bytes());
        Ok(block)
    }

    /// Recover the address that sealed `block`.
    pub fn sealer(&self, block: &Block) -> WorkerResult<Address> {
        let extra = &block.header.extra;
        if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(WorkerError::MissingSignature);
        }
        let seal = &extra[extra.len() - EXTRA_SEAL..];
        let digest = block.header.seal_hash(EXTRA_VANITY);
        recover_address(&digest, seal).map_err(WorkerError::from)
    }
}

/// Current unix time in milliseconds.
pub fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::ProofSignature;

    fn prepared_header(number: u64, parent: &Header) -> Header {
        let engine = ProofEngine;
        let mut header = Header {
            parent_hash: parent.hash(),
            number,
            ..Default::default()
        };
        engine.prepare_header(&mut header);
        header
    }

    #[test]
    fn prepare_reserves_vanity_and_seal() {
        let engine = ProofEngine;
        let mut header = Header {
            extra: vec![0xAA; 4],
            ..Default::default()
        };
        engine.prepare_header(&mut header);
        assert_eq!(header.extra.len(), EXTRA_VANITY + EXTRA_SEAL);
        assert_eq!(header.extra[0], 0xAA);
        assert_eq!(header.difficulty, 1);
        assert!(header.time_ms > 0);
    }

    #[test]
    fn verify_header_happy_path() {
        let engine = ProofEngine;
        let mut genesis = Header::default();
        engine.prepare_header(&mut genesis);
        genesis.number = 0;
        let header = prepared_header(1, &genesis);
        engine.verify_header(&header, Some(&genesis)).unwrap();
    }

    #[test]
    fn verify_header_rejects_missing_seal() {
        let engine = ProofEngine;
        let header = Header {
            number: 1,
            extra: vec![0; EXTRA_VANITY],
            ..Default::default()
        };
        assert!(matches!(
            engine.verify_header(&header, None),
            Err(WorkerError::MissingSignature)
        ));
    }

    #[test]
    fn verify_header_rejects_bad_number() {
        let engine = ProofEngine;
        let mut genesis = Header::default();
        engine.prepare_header(&mut genesis);
        genesis.number = 0;
        let header = prepared_header(5, &genesis);
        assert!(matches!(
            engine.verify_header(&header, Some(&genesis)),
            Err(WorkerError::InvalidNumber)
        ));
    }

    #[test]
    fn verify_header_rejects_time_regression() {
        let engine = ProofEngine;
        let mut genesis = Header::default();
        engine.prepare_header(&mut genesis);
        genesis.number = 0;
        genesis.time_ms = u64::MAX;
        let header = prepared_header(1, &genesis);
        assert!(matches!(
            engine.verify_header(&header, Some(&genesis)),
            Err(WorkerError::InvalidTimestamp)
        ));
    }

    #[test]
    fn generated_proof_verifies_and_chains() {
        let engine = ProofEngine;
        let signer = ProofSigner::random();
        let parent = Header {
            proof_hash: [7; 32],
            ..Default::default()
        };
        let mut header = Header {
            number: 1,
            ..Default::default()
        };
        let txs = vec![Transaction::new(vec![1]), Transaction::new(vec![2])];
        let proof = engine
            .generate_proof(&signer, &mut header, &parent, &txs, &[])
            .unwrap();

        let new_root = engine
            .verify_proof(&signer.address(), &parent.proof_hash, &proof)
            .unwrap();
        assert_eq!(new_root, header.proof_hash);
        assert_eq!(new_root, mix_hash(&parent.proof_hash, &header.tx_root));
        engine
            .verify_proof_quick(&parent.proof_hash, &header.tx_root, &new_root)
            .unwrap();
    }

    #[test]
    fn proof_rejected_for_wrong_signer() {
        let engine = ProofEngine;
        let signer = ProofSigner::random();
        let other = ProofSigner::random();
        let parent = Header::default();
        let mut header = Header {
            number: 1,
            ..Default::default()
        };
        let proof = engine
            .generate_proof(&signer, &mut header, &parent, &[], &[])
            .unwrap();
        assert!(engine
            .verify_proof(&other.address(), &parent.proof_hash, &proof)
            .is_err());
    }

    #[test]
    fn proof_rejected_for_wrong_last_root() {
        let engine = ProofEngine;
        let signer = ProofSigner::random();
        let parent = Header::default();
        let mut header = Header {
            number: 1,
            ..Default::default()
        };
        let proof = engine
            .generate_proof(&signer, &mut header, &parent, &[], &[])
            .unwrap();
        assert!(engine
            .verify_proof(&signer.address(), &[9; 32], &proof)
            .is_err());
    }

    #[test]
    fn permissive_policy_accepts_anything() {
        let engine = ProofEngine;
        let proof = WorkProof {
            number: 1,
            sign: ProofSignature(vec![0; 65]),
            txs: vec![],
            states: vec![ProofState {
                addr: [1; 20],
                root: [2; 32],
                num: 1,
            }],
        };
        assert!(engine.verify_state(StatePolicy::Permissive, &[1; 20], &HashSet::new(), &proof));
    }

    #[test]
    fn strict_policy_requires_known_root() {
        let engine = ProofEngine;
        let coinbase = [1; 20];
        let known = [2; 32];
        let proof_for = |root: Hash| WorkProof {
            number: 1,
            sign: ProofSignature(vec![0; 65]),
            txs: vec![],
            states: vec![ProofState {
                addr: coinbase,
                root,
                num: 1,
            }],
        };
        let mut history = HashSet::new();
        history.insert(known);

        assert!(engine.verify_state(StatePolicy::Strict, &coinbase, &history, &proof_for(known)));
        assert!(!engine.verify_state(
            StatePolicy::Strict,
            &coinbase,
            &history,
            &proof_for([9; 32])
        ));
    }

    #[test]
    fn seal_then_recover_sealer() {
        let engine = ProofEngine;
        let signer = ProofSigner::random();
        let mut header = Header {
            number: 3,
            ..Default::default()
        };
        engine.prepare_header(&mut header);
        let block = engine.finalize(header, [0; 32], vec![], vec![], &[]);
        let sealed = engine.seal_block(&signer, block).unwrap();
        assert_eq!(engine.sealer(&sealed).unwrap(), signer.address());
    }

    #[test]
    fn finalize_derives_roots() {
        let engine = ProofEngine;
        let receipts = vec![Receipt::new(braid_types::ReceiptStatus::Success, [1; 32])];
        let states = vec![ProofState {
            addr: [1; 20],
            root: [2; 32],
            num: 1,
        }];
        let block = engine.finalize(Header::default(), [5; 32], vec![], states.clone(), &receipts);
        assert_eq!(block.header.state_root, [5; 32]);
        assert_eq!(block.header.receipt_root, derive_root(&receipts));
        assert_eq!(block.header.proof_root, derive_root(&states));
    }
}
