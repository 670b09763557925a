//! # Braid Sigpool
//!
//! A fixed-size pool of worker threads that performs ECDSA public-key
//! recovery off the round loop's critical path.
//!
//! Dispatch is non-blocking: requests round-robin over the workers'
//! bounded queues and fall through to the next worker when one is full.
//! When every queue is full the request is dropped; callers must treat a
//! drop as "no signer available yet" and fall back to the synchronous
//! path if they need an answer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread::JoinHandle;

use braid_crypto::recover_pubkey;
use braid_types::Hash;
use thiserror::Error;
use tracing::{debug, trace};

/// Per-worker queue depth.
const WORKER_QUEUE_DEPTH: usize = 100_000;

/// Minimum number of recovery workers.
const MIN_WORKERS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigPoolError {
    /// Public key recovery failed or produced a malformed key.
    #[error("signature check failed")]
    SignCheckFailed,
}

/// One queued recovery request.
struct RecoverRequest {
    /// Hash of the transaction the signature belongs to, for tracing.
    tx_hash: Hash,
    digest: Hash,
    sig: [u8; 65],
}

/// Counters exposed for operators.
#[derive(Debug, Default)]
pub struct SigPoolMetrics {
    pub recovered: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

/// The recovery worker pool.
pub struct SigWorkerPool {
    slots: Vec<SyncSender<RecoverRequest>>,
    workers: Vec<JoinHandle<()>>,
    next: AtomicUsize,
    metrics: std::sync::Arc<SigPoolMetrics>,
}

impl SigWorkerPool {
    /// Spawn a pool with `threads` workers; `None` sizes it to the host
    /// (`cpus − 1`, at least two).
    pub fn new(threads: Option<usize>) -> Self {
        let count = threads.unwrap_or_else(default_worker_count).max(1);
        let metrics = std::sync::Arc::new(SigPoolMetrics::default());
        let mut slots = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let (tx, rx) = sync_channel::<RecoverRequest>(WORKER_QUEUE_DEPTH);
            let worker_metrics = metrics.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sig-recover-{i}"))
                .spawn(move || {
                    while let Ok(req) = rx.recv() {
                        match recover_pubkey(&req.digest, &req.sig) {
                            Ok(_) => {
                                worker_metrics.recovered.fetch_add(1, Ordering::Relaxed);
                                trace!(tx_hash = %hex_fmt(&req.tx_hash), "recovered signer");
                            }
                            Err(_) => {
                                worker_metrics.failed.fetch_add(1, Ordering::Relaxed);
                                debug!(tx_hash = %hex_fmt(&req.tx_hash), "async recover failed");
                            }
                        }
                    }
                })
                .expect("spawn sig worker");
            slots.push(tx);
            workers.push(handle);
        }
        Self {
            slots,
            workers,
            next: AtomicUsize::new(0),
            metrics,
        }
    }

    pub fn metrics(&self) -> &SigPoolMetrics {
        &self.metrics
    }

    /// Recover the uncompressed public key synchronously.
    ///
    /// `r` and `s` may be shorter than 32 bytes; they are right-aligned
    /// into their fields.
    pub fn validate_sync(
        &self,
        digest: &Hash,
        r: &[u8],
        s: &[u8],
        v: u8,
    ) -> Result<Vec<u8>, SigPoolError> {
        let sig = assemble_signature(r, s, v).ok_or(SigPoolError::SignCheckFailed)?;
        let pubkey = recover_pubkey(digest, &sig).map_err(|_| SigPoolError::SignCheckFailed)?;
        if pubkey.first() != Some(&0x04) {
            return Err(SigPoolError::SignCheckFailed);
        }
        Ok(pubkey)
    }

    /// Enqueue a recovery without blocking. Returns `false` when every
    /// worker queue was full and the request was dropped.
    pub fn validate_async(&self, tx_hash: Hash, digest: &Hash, r: &[u8], s: &[u8], v: u8) -> bool {
        let Some(sig) = assemble_signature(r, s, v) else {
            self.metrics.failed.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let mut req = RecoverRequest {
            tx_hash,
            digest: *digest,
            sig,
        };
        let start = self.next.load(Ordering::Relaxed);
        for probe in 0..self.slots.len() {
            let idx = (start + probe) % self.slots.len();
            match self.slots[idx].try_send(req) {
                Ok(()) => {
                    self.next.store(idx.wrapping_add(1), Ordering::Relaxed);
                    return true;
                }
                Err(TrySendError::Full(back)) | Err(TrySendError::Disconnected(back)) => {
                    req = back;
                }
            }
        }
        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("all recovery queues full, request dropped");
        false
    }

    /// Close the queues and join every worker.
    pub fn shutdown(mut self) {
        self.slots.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SigWorkerPool {
    fn drop(&mut self) {
        self.slots.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_WORKERS);
    (cpus.saturating_sub(1)).max(MIN_WORKERS)
}

/// Right-align `r` and `s` into a 65-byte recoverable signature.
fn assemble_signature(r: &[u8], s: &[u8], v: u8) -> Option<[u8; 65]> {
    if r.len() > 32 || s.len() > 32 {
        return None;
    }
    let mut sig = [0u8; 65];
    sig[32 - r.len()..32].copy_from_slice(r);
    sig[64 - s.len()..64].copy_from_slice(s);
    sig[64] = v;
    Some(sig)
}

fn hex_fmt(hash: &Hash) -> String {
    let mut s = String::with_capacity(16);
    for b in &hash[..8] {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_crypto::Keypair;
    use braid_types::sha3_256;

    fn signed_digest() -> (Keypair, Hash, Vec<u8>) {
        let key = Keypair::generate();
        let digest = sha3_256(b"pool input");
        let sig = key.sign_digest(&digest).unwrap();
        (key, digest, sig)
    }

    #[test]
    fn sync_validate_recovers_uncompressed_key() {
        let pool = SigWorkerPool::new(Some(2));
        let (_, digest, sig) = signed_digest();
        let pubkey = pool
            .validate_sync(&digest, &sig[..32], &sig[32..64], sig[64])
            .unwrap();
        assert_eq!(pubkey.len(), 65);
        assert_eq!(pubkey[0], 0x04);
    }

    #[test]
    fn sync_validate_rejects_garbage() {
        let pool = SigWorkerPool::new(Some(2));
        let digest = sha3_256(b"x");
        let err = pool
            .validate_sync(&digest, &[0xFF; 32], &[0xFF; 32], 27)
            .unwrap_err();
        assert_eq!(err, SigPoolError::SignCheckFailed);
    }

    #[test]
    fn sync_validate_rejects_oversized_scalars() {
        let pool = SigWorkerPool::new(Some(2));
        let digest = sha3_256(b"x");
        assert!(pool.validate_sync(&digest, &[0u8; 33], &[0u8; 32], 27).is_err());
    }

    #[test]
    fn async_validate_accepts_and_processes() {
        let pool = SigWorkerPool::new(Some(2));
        let (_, digest, sig) = signed_digest();
        assert!(pool.validate_async([1; 32], &digest, &sig[..32], &sig[32..64], sig[64]));
        // Drain by shutting down; workers join after finishing the queue.
        pool.shutdown();
    }

    #[test]
    fn short_scalars_are_right_aligned() {
        let sig = assemble_signature(&[0x01], &[0x02], 27).unwrap();
        assert_eq!(sig[31], 0x01);
        assert_eq!(sig[63], 0x02);
        assert_eq!(sig[64], 27);
        assert!(sig[..31].iter().all(|&b| b == 0));
    }
}
