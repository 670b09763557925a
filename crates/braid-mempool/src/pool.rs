//! The transaction pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use braid_types::{Hash, Transaction};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::MempoolConfig;
use crate::errors::TxPoolError;
use crate::ports::{HeadSource, TxSource};

/// Transactions are shared between the pool, the working sets, and the
/// proof messages without copying payloads.
pub type PoolTx = Arc<Transaction>;

/// Operator-visible counters.
#[derive(Debug, Default)]
pub struct TxPoolMetrics {
    /// Verify steps skipped because the verify channel was full. The
    /// transaction stays queued; this is the known starvation corner of
    /// the queue→verify hand-off.
    pub verify_dropped: AtomicU64,
    /// Transactions rejected by verification.
    pub invalid: AtomicU64,
    /// Transactions accepted into the ingest channels.
    pub accepted: AtomicU64,
}

impl TxPoolMetrics {
    pub fn verify_dropped(&self) -> u64 {
        self.verify_dropped.load(Ordering::Relaxed)
    }

    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

/// The pool. See the crate docs for the pipeline shape.
pub struct TxPool {
    config: MempoolConfig,
    head: Arc<dyn HeadSource>,

    seen: Mutex<HashSet<Hash>>,
    queued: DashMap<Hash, PoolTx>,
    pending: DashMap<Hash, PoolTx>,
    on_chain: DashMap<Hash, u64>,
    working: DashMap<u64, Vec<PoolTx>>,

    /// Ingest slot senders; cleared on stop, which closes the pipeline in
    /// topological order.
    ingress: RwLock<Vec<mpsc::Sender<PoolTx>>>,
    metrics: TxPoolMetrics,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TxPool {
    /// Build the pool and spawn its pipeline workers.
    pub fn start(config: MempoolConfig, head: Arc<dyn HeadSource>) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        let pool = Arc::new(Self {
            config: config.clone(),
            head,
            seen: Mutex::new(HashSet::new()),
            queued: DashMap::new(),
            pending: DashMap::new(),
            on_chain: DashMap::new(),
            working: DashMap::new(),
            ingress: RwLock::new(Vec::new()),
            metrics: TxPoolMetrics::default(),
            cancel,
            tasks: Mutex::new(Vec::new()),
        });

        let (invalid_tx, invalid_rx) = mpsc::channel::<PoolTx>(config.invalid_depth);
        let mut handles = Vec::with_capacity(config.ingest_slots * 2 + 2);
        let mut senders = Vec::with_capacity(config.ingest_slots);
        for slot in 0..config.ingest_slots {
            let (full_tx, full_rx) = mpsc::channel::<PoolTx>(config.slot_depth);
            let (verify_tx, verify_rx) = mpsc::channel::<PoolTx>(config.slot_depth);
            senders.push(full_tx);
            handles.push(tokio::spawn(Arc::clone(&pool).queue_worker(
                slot,
                full_rx,
                verify_tx,
            )));
            handles.push(tokio::spawn(Arc::clone(&pool).verify_worker(
                verify_rx,
                invalid_tx.clone(),
            )));
        }
        drop(invalid_tx);
        handles.push(tokio::spawn(Arc::clone(&pool).invalid_worker(invalid_rx)));
        handles.push(tokio::spawn(Arc::clone(&pool).evict_worker()));

        *pool.ingress.write() = senders;
        *pool.tasks.lock() = handles;
        pool
    }

    /// Close the ingest channels and wait for every worker. Channel closes
    /// cascade: queue workers drain and drop their verify senders, verify
    /// workers drain and drop the invalid sender, the drain task exits.
    pub async fn stop(&self) {
        let _ = self.cancel.send(true);
        self.ingress.write().clear();
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> &TxPoolMetrics {
        &self.metrics
    }

    /// Submit one transaction.
    pub fn add_tx(&self, tx: Transaction) -> Result<(), TxPoolError> {
        self.add_pool_tx(Arc::new(tx))
    }

    /// Best-effort batch submit; individual failures are logged and
    /// skipped.
    pub fn add_txs(&self, txs: Vec<Transaction>) {
        for tx in txs {
            let hash = tx.hash();
            if let Err(err) = self.add_tx(tx) {
                trace!(tx_hash = %short(&hash), %err, "batch add skipped tx");
            }
        }
    }

    fn add_pool_tx(&self, tx: PoolTx) -> Result<(), TxPoolError> {
        let hash = tx.hash();
        if self.is_known(&hash) {
            return Err(TxPoolError::KnownTx(hash));
        }
        self.mark_seen(hash);

        let slots = self.ingress.read();
        if slots.is_empty() {
            return Err(TxPoolError::Stopped);
        }
        let start = rand::thread_rng().gen_range(0..slots.len());
        let mut tx = tx;
        for probe in 0..slots.len() {
            let idx = (start + probe) % slots.len();
            match slots[idx].try_send(tx) {
                Ok(()) => {
                    self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(back))
                | Err(mpsc::error::TrySendError::Closed(back)) => tx = back,
            }
        }
        debug!(tx_hash = %short(&hash), "every ingest slot full");
        Err(TxPoolError::IngressFull)
    }

    fn is_known(&self, hash: &Hash) -> bool {
        self.seen.lock().contains(hash)
            || self.queued.contains_key(hash)
            || self.pending.contains_key(hash)
            || self.on_chain.contains_key(hash)
    }

    fn mark_seen(&self, hash: Hash) {
        let mut seen = self.seen.lock();
        if seen.len() >= self.config.max_known_txs {
            seen.clear();
        }
        seen.insert(hash);
    }

    /// Placeholder verification; the execution milestone will replace it.
    fn verify_tx(_tx: &Transaction) -> bool {
        true
    }

    async fn queue_worker(
        self: Arc<Self>,
        slot: usize,
        mut full_rx: mpsc::Receiver<PoolTx>,
        verify_tx: mpsc::Sender<PoolTx>,
    ) {
        while let Some(tx) = full_rx.recv().await {
            self.queued.insert(tx.hash(), Arc::clone(&tx));
            if let Err(err) = verify_tx.try_send(tx) {
                // Known corner: the tx stays queued without a verify pass.
                self.metrics.verify_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(slot, %err, "verify channel full, verify step dropped");
            }
        }
    }

    async fn verify_worker(
        self: Arc<Self>,
        mut verify_rx: mpsc::Receiver<PoolTx>,
        invalid_tx: mpsc::Sender<PoolTx>,
    ) {
        while let Some(tx) = verify_rx.recv().await {
            let hash = tx.hash();
            if Self::verify_tx(&tx) {
                self.pending.insert(hash, tx);
                self.queued.remove(&hash);
            } else {
                self.queued.remove(&hash);
                let _ = invalid_tx.try_send(tx);
            }
        }
    }

    async fn invalid_worker(self: Arc<Self>, mut invalid_rx: mpsc::Receiver<PoolTx>) {
        while let Some(tx) = invalid_rx.recv().await {
            self.metrics.invalid.fetch_add(1, Ordering::Relaxed);
            trace!(tx_hash = %short(&tx.hash()), "invalid transaction dropped");
        }
    }

    async fn evict_worker(self: Arc<Self>) {
        let mut cancel = self.cancel.subscribe();
        let mut ticker = tokio::time::interval(self.config.evict_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => self.fit_on_chain(),
                _ = cancel.changed() => break,
            }
        }
    }

    /// Drop on-chain entries that have fallen far enough behind the head.
    pub fn fit_on_chain(&self) {
        let horizon = self
            .head
            .head_number()
            .saturating_add(self.config.pool_block_count);
        self.on_chain.retain(|_, number| *number <= horizon);
    }

    // === Accessors ===

    /// `(pending, queued)` counts.
    pub fn stats(&self) -> (usize, usize) {
        (self.pending.len(), self.queued.len())
    }

    /// Snapshot of pending and queued transactions.
    pub fn content(&self) -> (Vec<PoolTx>, Vec<PoolTx>) {
        let pending = self.pending.iter().map(|e| Arc::clone(e.value())).collect();
        let queued = self.queued.iter().map(|e| Arc::clone(e.value())).collect();
        (pending, queued)
    }

    /// Snapshot of pending transactions.
    pub fn pended(&self) -> Vec<PoolTx> {
        self.pending.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn get_tx_by_hash(&self, hash: &Hash) -> Option<PoolTx> {
        self.pending
            .get(hash)
            .map(|e| Arc::clone(e.value()))
            .or_else(|| self.queued.get(hash).map(|e| Arc::clone(e.value())))
    }

    pub fn on_chain_number(&self, hash: &Hash) -> Option<u64> {
        self.on_chain.get(hash).map(|e| *e.value())
    }
}

impl TxSource for TxPool {
    fn take_pending(&self, work_id: u64, max: usize) -> Vec<PoolTx> {
        let hashes: Vec<Hash> = self
            .pending
            .iter()
            .take(max)
            .map(|e| *e.key())
            .collect();
        let mut drained = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some((_, tx)) = self.pending.remove(&hash) {
                drained.push(tx);
            }
        }
        if !drained.is_empty() {
            self.working.insert(work_id, drained.clone());
        }
        drained
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn work_ended(&self, work_id: u64, block_number: u64, succeeded: bool) {
        let Some((_, txs)) = self.working.remove(&work_id) else {
            return;
        };
        for tx in txs {
            let hash = tx.hash();
            if succeeded {
                self.on_chain.insert(hash, block_number);
            } else {
                self.pending.insert(hash, tx);
            }
        }
    }

    fn add_remote_txs(&self, txs: Vec<Transaction>) {
        self.add_txs(txs);
    }
}

fn short(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedHead(u64);

    impl HeadSource for FixedHead {
        fn head_number(&self) -> u64 {
            self.0
        }
    }

    fn test_pool() -> Arc<TxPool> {
        TxPool::start(MempoolConfig::default(), Arc::new(FixedHead(0)))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn states_holding(pool: &TxPool, hash: &Hash) -> usize {
        let mut count = 0;
        count += usize::from(pool.queued.contains_key(hash));
        count += usize::from(pool.pending.contains_key(hash));
        count += usize::from(pool.on_chain.contains_key(hash));
        count += usize::from(
            pool.working
                .iter()
                .any(|e| e.value().iter().any(|tx| tx.hash() == *hash)),
        );
        count
    }

    #[tokio::test]
    async fn tx_flows_to_pending() {
        let pool = test_pool();
        let tx = Transaction::new(vec![1, 2, 3]);
        let hash = tx.hash();
        pool.add_tx(tx).unwrap();
        wait_until(|| pool.pending.contains_key(&hash)).await;
        assert_eq!(states_holding(&pool, &hash), 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn duplicate_is_rejected() {
        let pool = test_pool();
        pool.add_tx(Transaction::new(vec![7])).unwrap();
        let err = pool.add_tx(Transaction::new(vec![7])).unwrap_err();
        assert!(matches!(err, TxPoolError::KnownTx(_)));
        pool.stop().await;
    }

    #[tokio::test]
    async fn take_pending_moves_to_working() {
        let pool = test_pool();
        for i in 0u8..5 {
            pool.add_tx(Transaction::new(vec![i])).unwrap();
        }
        wait_until(|| pool.pending_count() == 5).await;

        let drained = pool.take_pending(42, 3);
        assert_eq!(drained.len(), 3);
        assert_eq!(pool.pending_count(), 2);
        for tx in &drained {
            assert_eq!(states_holding(&pool, &tx.hash()), 1);
        }
        pool.stop().await;
    }

    #[tokio::test]
    async fn work_ended_success_moves_on_chain() {
        let pool = test_pool();
        pool.add_tx(Transaction::new(vec![9])).unwrap();
        wait_until(|| pool.pending_count() == 1).await;
        let drained = pool.take_pending(1, 10);
        let hash = drained[0].hash();

        pool.work_ended(1, 5, true);
        assert_eq!(pool.on_chain_number(&hash), Some(5));
        assert_eq!(pool.pending_count(), 0);
        assert!(pool.working.is_empty());
        pool.stop().await;
    }

    #[tokio::test]
    async fn work_ended_failure_returns_to_pending() {
        let pool = test_pool();
        pool.add_tx(Transaction::new(vec![9])).unwrap();
        wait_until(|| pool.pending_count() == 1).await;
        let drained = pool.take_pending(1, 10);
        let hash = drained[0].hash();

        pool.work_ended(1, 5, false);
        assert!(pool.pending.contains_key(&hash));
        assert_eq!(pool.on_chain_number(&hash), None);
        pool.stop().await;
    }

    #[tokio::test]
    async fn on_chain_blocks_resubmission_until_evicted() {
        let head = Arc::new(FixedHead(500));
        let pool = TxPool::start(
            MempoolConfig {
                pool_block_count: 10,
                ..Default::default()
            },
            head,
        );
        pool.add_tx(Transaction::new(vec![3])).unwrap();
        wait_until(|| pool.pending_count() == 1).await;
        let hash = pool.take_pending(1, 1)[0].hash();
        pool.work_ended(1, 2, true);

        // Still known while on chain (and in the seen set).
        assert!(matches!(
            pool.add_tx(Transaction::new(vec![3])),
            Err(TxPoolError::KnownTx(_))
        ));

        // Head is far past number 2 + pool_block_count: evicted.
        pool.fit_on_chain();
        assert_eq!(pool.on_chain_number(&hash), None);
        pool.stop().await;
    }

    #[tokio::test]
    async fn seen_set_clears_on_overflow() {
        let pool = TxPool::start(
            MempoolConfig {
                max_known_txs: 2,
                ..Default::default()
            },
            Arc::new(FixedHead(0)),
        );
        for i in 0u8..5 {
            let _ = pool.add_tx(Transaction::new(vec![i]));
        }
        assert!(pool.seen.lock().len() <= 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn ingress_full_when_slots_saturated() {
        // One slot of depth one with no room to drain before the probe.
        let pool = TxPool::start(
            MempoolConfig {
                ingest_slots: 1,
                slot_depth: 1,
                ..Default::default()
            },
            Arc::new(FixedHead(0)),
        );
        let mut saw_full = false;
        for i in 0u16..200 {
            match pool.add_tx(Transaction::new(i.to_be_bytes().to_vec())) {
                Err(TxPoolError::IngressFull) => {
                    saw_full = true;
                    break;
                }
                _ => {}
            }
        }
        // With a single depth-1 slot under a burst, saturation is expected
        // at least transiently.
        assert!(saw_full || pool.metrics().accepted() == 200);
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_pipeline() {
        let pool = test_pool();
        pool.add_tx(Transaction::new(vec![1])).unwrap();
        pool.stop().await;
        assert!(matches!(
            pool.add_tx(Transaction::new(vec![2])),
            Err(TxPoolError::Stopped)
        ));
    }
}
