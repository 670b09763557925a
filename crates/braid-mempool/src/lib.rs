//! # Braid Mempool
//!
//! Transaction pool feeding the mining rounds.
//!
//! ## Pipeline
//!
//! ```text
//! add_tx ──dedup──► fullCh[i] ──queue worker──► queued ──verifyCh[i]──►
//!   verify worker ──pass──► pending ──pending(work_id)──► working[id]
//!                 └─fail──► invalidCh                        │
//!                                        work_ended(ok) ──► on_chain
//!                                        work_ended(err) ─► pending
//! ```
//!
//! ## Invariants
//!
//! - A transaction hash lives in at most one of `queued`, `pending`,
//!   `working[*]`, `on_chain` at any instant.
//! - The recently-seen set is bounded; it clears itself on overflow rather
//!   than evicting piecemeal.
//! - The queue→verify hand-off never blocks: on backpressure the verify
//!   step is skipped, logged, and counted (the transaction stays queued).

pub mod config;
pub mod errors;
pub mod pool;
pub mod ports;

pub use config::MempoolConfig;
pub use errors::TxPoolError;
pub use pool::{PoolTx, TxPool, TxPoolMetrics};
pub use ports::{HeadSource, TxSource};
