//! Tracking of locally emitted proofs awaiting peer confirms.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use braid_types::{Address, Hash, ProofConfirm};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::work::Work;

struct ProofInfo {
    threshold: usize,
    work: Work,
    accepted: HashSet<Address>,
    rejected: HashSet<Address>,
    created_at: Instant,
}

/// Aggregates confirms per proof signature until the quorum threshold is
/// reached, the rejection threshold is reached, or the wait times out.
/// Each entry fires exactly once: the verdict check and the removal happen
/// under the same lock.
pub struct UnconfirmedProofs {
    proofs: Mutex<HashMap<Hash, ProofInfo>>,
    confirmed_tx: mpsc::Sender<Work>,
    cancel: watch::Receiver<bool>,
    wait_timeout: Duration,
}

impl UnconfirmedProofs {
    pub fn new(
        confirmed_tx: mpsc::Sender<Work>,
        cancel: watch::Receiver<bool>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            proofs: Mutex::new(HashMap::new()),
            confirmed_tx,
            cancel,
            wait_timeout,
        }
    }

    /// Register a freshly emitted proof. The first insert wins; a repeat
    /// for the same signature is ignored. A zero threshold needs no peer
    /// at all and completes on the spot.
    pub fn insert(&self, proof_sig_hash: Hash, mut work: Work, threshold: usize) {
        if threshold == 0 {
            work.confirmed = true;
            self.dispatch(work);
            return;
        }
        let mut proofs = self.proofs.lock();
        proofs.entry(proof_sig_hash).or_insert_with(|| ProofInfo {
            threshold,
            work,
            accepted: HashSet::new(),
            rejected: HashSet::new(),
            created_at: Instant::now(),
        });
    }

    /// Record one peer's verdict. When either side reaches the threshold
    /// the entry is removed and the work handed to the round loop.
    pub fn confirm(&self, from: Address, confirm: &ProofConfirm) {
        let sig_hash = confirm.signature.hash();
        let finished = {
            let mut proofs = self.proofs.lock();
            let Some(info) = proofs.get_mut(&sig_hash) else {
                return;
            };
            if confirm.confirm {
                info.accepted.insert(from);
            } else {
                info.rejected.insert(from);
            }
            if info.accepted.len() >= info.threshold || info.rejected.len() >= info.threshold {
                let mut info = proofs.remove(&sig_hash).expect("entry present under lock");
                if info.rejected.len() >= info.threshold {
                    info!(
                        proof = %hex::encode(sig_hash),
                        rejected = info.rejected.len(),
                        "proof rejected by quorum"
                    );
                    info.work.confirmed = false;
                } else {
                    debug!(
                        proof = %hex::encode(sig_hash),
                        accepted = info.accepted.len(),
                        "proof confirmed by quorum"
                    );
                    info.work.confirmed = true;
                }
                Some(info.work)
            } else {
                None
            }
        };
        if let Some(work) = finished {
            self.dispatch(work);
        }
    }

    /// Sweep out entries older than the confirm timeout; their work is
    /// handed off unconfirmed.
    pub fn check_timeout(&self) {
        let expired: Vec<Work> = {
            let mut proofs = self.proofs.lock();
            let now = Instant::now();
            let stale: Vec<Hash> = proofs
                .iter()
                .filter(|(_, info)| now.duration_since(info.created_at) > self.wait_timeout)
                .map(|(hash, _)| *hash)
                .collect();
            stale
                .into_iter()
                .filter_map(|hash| {
                    debug!(proof = %hex::encode(hash), "proof confirm timed out");
                    proofs.remove(&hash).map(|info| info.work)
                })
                .collect()
        };
        for work in expired {
            self.dispatch(work);
        }
    }

    /// Timeout sweep loop; exits on cancellation.
    pub async fn run(&self, interval: Duration) {
        let mut cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_timeout(),
                _ = cancel.changed() => break,
            }
        }
    }

    /// Remove and return every tracked work, for miner-stop teardown.
    pub fn drain(&self) -> Vec<Work> {
        self.proofs
            .lock()
            .drain()
            .map(|(_, info)| info.work)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proofs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.lock().is_empty()
    }

    /// Hand a finished work to the round loop without ever blocking the
    /// caller: on backpressure the send moves to a task that races
    /// shutdown.
    fn dispatch(&self, work: Work) {
        match self.confirmed_tx.try_send(work) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(work)) => {
                let tx = self.confirmed_tx.clone();
                let mut cancel = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tx.send(work) => {}
                        _ = cancel.changed() => {
                            debug!("confirm hand-off dropped on shutdown");
                        }
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("round loop gone, confirmed work dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_storage::StateDb;
    use braid_types::{Header, ProofSignature};

    fn work(id: u64) -> Work {
        Work::new(id, Header::default(), StateDb::at([0; 32]), vec![])
    }

    fn confirm_msg(sig: &ProofSignature, verdict: bool) -> ProofConfirm {
        ProofConfirm {
            signature: sig.clone(),
            confirm: verdict,
        }
    }

    fn tracker(capacity: usize) -> (UnconfirmedProofs, mpsc::Receiver<Work>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the test body.
        std::mem::forget(_cancel_tx);
        (
            UnconfirmedProofs::new(tx, cancel_rx, Duration::from_secs(30)),
            rx,
        )
    }

    #[tokio::test]
    async fn quorum_fires_once_with_confirmed_work() {
        let (tracker, mut rx) = tracker(4);
        let sig = ProofSignature(vec![1; 65]);
        tracker.insert(sig.hash(), work(1), 2);

        tracker.confirm([1; 20], &confirm_msg(&sig, true));
        assert!(rx.try_recv().is_err());
        tracker.confirm([2; 20], &confirm_msg(&sig, true));

        let finished = rx.recv().await.unwrap();
        assert!(finished.confirmed);
        assert!(tracker.is_empty());

        // Late confirms find nothing to act on.
        tracker.confirm([3; 20], &confirm_msg(&sig, true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_votes_do_not_double_count() {
        let (tracker, mut rx) = tracker(4);
        let sig = ProofSignature(vec![2; 65]);
        tracker.insert(sig.hash(), work(1), 2);

        tracker.confirm([1; 20], &confirm_msg(&sig, true));
        tracker.confirm([1; 20], &confirm_msg(&sig, true));
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn rejection_quorum_fires_unconfirmed() {
        let (tracker, mut rx) = tracker(4);
        let sig = ProofSignature(vec![3; 65]);
        tracker.insert(sig.hash(), work(1), 1);

        tracker.confirm([1; 20], &confirm_msg(&sig, false));
        let finished = rx.recv().await.unwrap();
        assert!(!finished.confirmed);
    }

    #[tokio::test]
    async fn zero_threshold_completes_immediately() {
        let (tracker, mut rx) = tracker(4);
        let sig = ProofSignature(vec![4; 65]);
        tracker.insert(sig.hash(), work(1), 0);

        let finished = rx.recv().await.unwrap();
        assert!(finished.confirmed);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn first_insert_wins() {
        let (tracker, _rx) = tracker(4);
        let sig = ProofSignature(vec![5; 65]);
        tracker.insert(sig.hash(), work(1), 2);
        tracker.insert(sig.hash(), work(2), 9);
        assert_eq!(tracker.len(), 1);
        // The surviving entry still carries the first threshold.
        let proofs = tracker.proofs.lock();
        assert_eq!(proofs.values().next().unwrap().threshold, 2);
    }

    #[tokio::test]
    async fn timeout_sweeps_stale_entries() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        std::mem::forget(_cancel_tx);
        let tracker = UnconfirmedProofs::new(tx, cancel_rx, Duration::from_millis(0));
        let sig = ProofSignature(vec![6; 65]);
        tracker.insert(sig.hash(), work(1), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.check_timeout();
        let finished = rx.recv().await.unwrap();
        assert!(!finished.confirmed);
        assert!(tracker.is_empty());
    }
}
