//! Protocol wire messages.
//!
//! Each inner payload defines `data()`, the exact byte string its detached
//! signature covers. Outer `*Msg` envelopes pair the payload with that
//! signature and derive a SHA3-256 identity over `data() ‖ sig`, which the
//! router uses for its rebroadcast budget.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::entities::{Address, Hash, ProofState, Transaction};
use crate::errors::CodecError;
use crate::hashing::sha3_256;

/// A recoverable signature, `r(32) ‖ s(32) ‖ v(1)`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProofSignature(#[serde_as(as = "Bytes")] pub Vec<u8>);

impl ProofSignature {
    /// SHA3-256 identity of the signature bytes. Keys the unconfirmed-proof
    /// tracker and the confirm messages.
    pub fn hash(&self) -> Hash {
        sha3_256(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ProofSignature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// =============================================================================
// WORK PROOF
// =============================================================================

/// A miner's signed commitment to one round: "I propose these transactions
/// on top of my last proof root".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkProof {
    pub number: u64,
    /// Signature over `mix_hash(last_proof_root, tx_root)` by the
    /// emitter's coinbase key.
    pub sign: ProofSignature,
    pub txs: Vec<Transaction>,
    pub states: Vec<ProofState>,
}

impl WorkProof {
    /// Bytes covered by the envelope signature.
    pub fn data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.sign.0.len());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.sign.0);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkProofMsg {
    pub proof: WorkProof,
    pub sign: ProofSignature,
}

impl WorkProofMsg {
    pub fn hash(&self) -> Hash {
        envelope_hash(&self.proof.data(), &self.sign)
    }
}

// =============================================================================
// PROOF CONFIRM
// =============================================================================

/// A verifier's signed verdict over another miner's proof, keyed by the
/// proof's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProofConfirm {
    pub signature: ProofSignature,
    pub confirm: bool,
}

impl ProofConfirm {
    pub fn data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.signature.0.len() + 1);
        buf.extend_from_slice(&self.signature.0);
        buf.push(u8::from(self.confirm));
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfirmMsg {
    pub confirm: ProofConfirm,
    pub sign: ProofSignature,
}

impl ConfirmMsg {
    pub fn hash(&self) -> Hash {
        envelope_hash(&self.confirm.data(), &self.sign)
    }
}

// =============================================================================
// STATE QUERY / RESPONSE
// =============================================================================

/// Request for `miner`'s historical proof state at `number`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueryState {
    #[serde_as(as = "Bytes")]
    pub miner: Address,
    pub number: u64,
}

impl QueryState {
    pub fn data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.miner);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueryStateMsg {
    pub query: QueryState,
    pub sign: ProofSignature,
}

impl QueryStateMsg {
    pub fn hash(&self) -> Hash {
        envelope_hash(&self.query.data(), &self.sign)
    }
}

/// Reply carrying `miner`'s proof root at `number`, addressed to `querier`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseState {
    pub number: u64,
    pub root: Hash,
    #[serde_as(as = "Bytes")]
    pub querier: Address,
}

impl ResponseState {
    pub fn data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(60);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.root);
        buf.extend_from_slice(&self.querier);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseStateMsg {
    pub response: ResponseState,
    pub sign: ProofSignature,
}

impl ResponseStateMsg {
    pub fn hash(&self) -> Hash {
        envelope_hash(&self.response.data(), &self.sign)
    }
}

// =============================================================================
// TRANSPORT FRAME
// =============================================================================

/// Everything a peer can put on the wire, tagged by message code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMessage {
    Txs(Vec<Transaction>),
    WorkProof(WorkProofMsg),
    ProofConfirm(ConfirmMsg),
    GetState(QueryStateMsg),
    ResState(ResponseStateMsg),
}

impl NetMessage {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("net message always encodes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn envelope_hash(data: &[u8], sign: &ProofSignature) -> Hash {
    let mut buf = Vec::with_capacity(data.len() + sign.0.len());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&sign.0);
    sha3_256(&buf)
}
