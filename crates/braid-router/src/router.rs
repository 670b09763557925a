//! The message router.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braid_mempool::TxSource;
use braid_types::{Address, Hash, NetMessage, NodeRole, Transaction};
use braid_worker::{MsgBus, OutboundEvent, WorkerEvent};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::RouterConfig;
use crate::ports::{PeerInfo, Transport};

/// One rebroadcast-budget cache: message identity → remaining re-emits.
type BudgetCache = Mutex<LruCache<Hash, u32>>;

/// Demux of inbound peer traffic and outlet for worker messages.
pub struct Router {
    config: RouterConfig,
    transport: Arc<dyn Transport>,
    worker_events: mpsc::Sender<WorkerEvent>,
    tx_source: Arc<dyn TxSource>,

    /// Sync gate: inbound transactions are dropped until the initial sync
    /// is done.
    accept_txs: AtomicBool,

    proof_budget: BudgetCache,
    confirm_budget: BudgetCache,
    query_budget: BudgetCache,
    response_budget: BudgetCache,

    tx_buffer: mpsc::UnboundedSender<Transaction>,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn spawn(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        worker_events: mpsc::Sender<WorkerEvent>,
        tx_source: Arc<dyn TxSource>,
    ) -> Arc<Self> {
        let (tx_buffer, buffer_rx) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);
        let cache = |size: usize| {
            Mutex::new(LruCache::new(
                NonZeroUsize::new(size).expect("cache size is non-zero"),
            ))
        };
        let router = Arc::new(Self {
            proof_budget: cache(config.dedup_cache_size),
            confirm_budget: cache(config.dedup_cache_size),
            query_budget: cache(config.dedup_cache_size),
            response_budget: cache(config.dedup_cache_size),
            config,
            transport,
            worker_events,
            tx_source,
            accept_txs: AtomicBool::new(false),
            tx_buffer,
            cancel,
            tasks: Mutex::new(Vec::new()),
        });
        router
            .tasks
            .lock()
            .push(tokio::spawn(Arc::clone(&router).batch_loop(buffer_rx)));
        router
    }

    /// Open the transaction gate once the initial sync has finished.
    pub fn set_accept_txs(&self, accept: bool) {
        self.accept_txs.store(accept, Ordering::SeqCst);
    }

    pub fn accepts_txs(&self) -> bool {
        self.accept_txs.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Entry point for every message a peer delivers.
    pub fn handle_message(&self, from: Address, msg: NetMessage) {
        match msg {
            NetMessage::Txs(txs) => self.handle_txs(from, txs),
            NetMessage::WorkProof(m) => {
                let hash = m.hash();
                let event = WorkerEvent::Proof(m.clone());
                self.budget_route(&self.proof_budget, hash, event, NetMessage::WorkProof(m));
            }
            NetMessage::ProofConfirm(m) => {
                let hash = m.hash();
                let event = WorkerEvent::Confirm(m.clone());
                self.budget_route(
                    &self.confirm_budget,
                    hash,
                    event,
                    NetMessage::ProofConfirm(m),
                );
            }
            NetMessage::GetState(m) => {
                let hash = m.hash();
                let event = WorkerEvent::Query(m.clone());
                self.budget_route(&self.query_budget, hash, event, NetMessage::GetState(m));
            }
            NetMessage::ResState(m) => {
                let hash = m.hash();
                let event = WorkerEvent::Response(m.clone());
                self.budget_route(&self.response_budget, hash, event, NetMessage::ResState(m));
            }
        }
    }

    /// Inbound transactions: gated on sync, marked as forwarded, and
    /// buffered toward the batch flusher.
    fn handle_txs(&self, from: Address, txs: Vec<Transaction>) {
        if !self.accepts_txs() {
            trace!(count = txs.len(), "sync gate closed, inbound txs dropped");
            return;
        }
        for tx in txs {
            let hash = tx.hash();
            self.transport.mark_known_tx(&from, &hash);
            // Arrived over the wire: never re-broadcast it ourselves.
            tx.set_forward(true);
            if self.tx_buffer.send(tx).is_err() {
                debug!("tx batcher gone, transaction dropped");
                return;
            }
        }
    }

    /// Propagate locally submitted transactions to mining peers that do
    /// not know them yet. Transactions already marked as forwarded are
    /// never re-broadcast.
    pub fn route_txs(&self, txs: &[Transaction]) {
        for tx in txs {
            if tx.is_forward() {
                continue;
            }
            tx.set_forward(true);
            let hash = tx.hash();
            for peer in self.transport.peers_without_tx(&hash) {
                if peer.role != NodeRole::MineNode {
                    continue;
                }
                self.transport.mark_known_tx(&peer.addr, &hash);
                self.transport
                    .send(&peer.addr, &NetMessage::Txs(vec![tx.clone()]));
            }
        }
    }

    /// First sight posts the message to the worker and arms its budget;
    /// every arrival while budget remains triggers one more rebroadcast;
    /// exhausted duplicates are dropped silently.
    fn budget_route(&self, cache: &BudgetCache, hash: Hash, event: WorkerEvent, msg: NetMessage) {
        let mut cache = cache.lock();
        let remaining = match cache.get(&hash) {
            Some(count) => *count,
            None => {
                if let Err(err) = self.worker_events.try_send(event) {
                    warn!(%err, "worker event queue full, message dropped");
                }
                self.config.rebroadcast_budget
            }
        };
        if remaining > 0 {
            self.broadcast_mine(&msg);
            cache.put(hash, remaining - 1);
        } else {
            cache.put(hash, 0);
        }
    }

    /// Broadcast mine-traffic to every peer except boot nodes.
    fn broadcast_mine(&self, msg: &NetMessage) {
        self.transport
            .broadcast_except(msg, &|peer: &PeerInfo| peer.role == NodeRole::BootNode);
    }

    /// Collect buffered transactions and flush them into the pool in
    /// bounded batches.
    async fn batch_loop(self: Arc<Self>, mut buffer_rx: mpsc::UnboundedReceiver<Transaction>) {
        let mut cancel = self.cancel.subscribe();
        let mut ticker = tokio::time::interval(self.config.batch_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut batch: Vec<Transaction> = Vec::with_capacity(self.config.batch_size);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        debug!(count = batch.len(), "flushing tx batch on interval");
                        self.tx_source.add_remote_txs(std::mem::take(&mut batch));
                    }
                }
                tx = buffer_rx.recv() => {
                    match tx {
                        Some(tx) => {
                            batch.push(tx);
                            if batch.len() >= self.config.batch_size {
                                debug!(count = batch.len(), "flushing full tx batch");
                                self.tx_source.add_remote_txs(std::mem::take(&mut batch));
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                self.tx_source.add_remote_txs(std::mem::take(&mut batch));
                            }
                            break;
                        }
                    }
                }
                _ = cancel.changed() => break,
            }
        }
    }
}

impl MsgBus for Router {
    fn post(&self, event: OutboundEvent) {
        let msg = match event {
            OutboundEvent::Proof(m) => NetMessage::WorkProof(m),
            OutboundEvent::Confirm(m) => NetMessage::ProofConfirm(m),
            OutboundEvent::Query(m) => NetMessage::GetState(m),
            OutboundEvent::Response(m) => NetMessage::ResState(m),
        };
        self.broadcast_mine(&msg);
    }

    fn mine_peers(&self) -> Vec<Address> {
        self.transport
            .peers()
            .into_iter()
            .filter(|peer| peer.role == NodeRole::MineNode)
            .map(|peer| peer.addr)
            .collect()
    }

    fn local_role(&self) -> NodeRole {
        self.transport.local_role()
    }
}
