//! # Braid Worker
//!
//! The mining round state machine and everything it leans on:
//!
//! - [`engine`]: header preparation/sanity, proof generation and
//!   chain-step verification, block finalization and sealing;
//! - [`work`]: the per-round working set and the placeholder executor;
//! - [`unconfirmed`]: aggregation of peer confirms until quorum,
//!   rejection, or timeout;
//! - [`pending`]: the ordered commit queue and its writer loop, the only
//!   path that appends to the chain;
//! - [`worker`]: the round loop, per-sender proof handling, state
//!   query/response, and the confirm-count batcher;
//! - [`miner`]: the start/stop supervisor with pause-on-sync.
//!
//! A round flows `Idle → PostMining → Mining`, broadcasts a signed work
//! proof, collects confirms, and on quorum hands the sealed block to the
//! commit queue. Any chain write error freezes new rounds until the queue
//! drains, then mining self-heals.

pub mod config;
pub mod engine;
pub mod errors;
pub mod miner;
pub mod pending;
pub mod ports;
pub mod unconfirmed;
pub mod work;
pub mod worker;

pub use config::{MinerConfig, StatePolicy};
pub use engine::ProofEngine;
pub use errors::{WorkerError, WorkerResult};
pub use miner::Miner;
pub use pending::WorkPending;
pub use ports::{MsgBus, OutboundEvent, SyncEvent, WorkerEvent};
pub use unconfirmed::UnconfirmedProofs;
pub use work::{RoundState, Work};
pub use worker::Worker;
