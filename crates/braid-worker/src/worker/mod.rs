//! The mining worker: round lifecycle, inbound event dispatch, and the
//! control surface.

mod mine;
mod verify;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use braid_crypto::ProofSigner;
use braid_mempool::TxSource;
use braid_storage::{ChainReader, ChainWriter, ProofStore};
use braid_types::{Address, Block, Hash, QueryStateMsg, WorkProofMsg};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MinerConfig;
use crate::engine::{ProofEngine, MAX_EXTRA_DATA};
use crate::errors::WorkerError;
use crate::pending::WorkPending;
use crate::ports::{MsgBus, WorkerEvent};
use crate::unconfirmed::UnconfirmedProofs;
use crate::work::RoundState;

/// Sealed-block proof hashes remembered for the state membership check.
const HISTORY_SIZE: usize = 10;

/// Signature hashes of proofs this node emitted.
const LOCAL_PROOF_CACHE: usize = 100_000;

/// In-flight state queries, one per peer.
const QUERY_CACHE: usize = 100_000;

/// Depth of each per-sender proof channel.
const SENDER_QUEUE_DEPTH: usize = 1_000;

/// Capacity of the quorum-verdict hand-off channel.
const CONFIRMED_DEPTH: usize = 10;

/// Per-session state of an active mining run.
struct MiningSession {
    unconfirmed: Arc<UnconfirmedProofs>,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// The worker. One per node; long-lived service loops are spawned by
/// [`Worker::spawn`], the round loop only while mining.
pub struct Worker {
    pub(crate) config: RwLock<MinerConfig>,
    pub(crate) engine: ProofEngine,
    pub(crate) signer: RwLock<Arc<ProofSigner>>,
    pub(crate) extra: RwLock<Vec<u8>>,

    pub(crate) chain: Arc<dyn ChainReader>,
    pub(crate) chain_writer: Arc<dyn ChainWriter>,
    pub(crate) proof_store: Arc<dyn ProofStore>,
    pub(crate) tx_source: Arc<dyn TxSource>,
    pub(crate) bus: Arc<dyn MsgBus>,

    pub(crate) pending_commits: Arc<WorkPending>,
    pub(crate) round_state: AtomicU8,
    pub(crate) mining: AtomicBool,

    /// Proof hashes of our recently sealed blocks.
    pub(crate) history: Mutex<LruCache<Hash, ()>>,
    /// Signature hashes of proofs we emitted; inbound confirms are matched
    /// against this.
    pub(crate) local_proofs: Mutex<LruCache<Hash, ()>>,
    /// Last state query sent per peer, to match responses.
    pub(crate) query_cache: Mutex<LruCache<Address, QueryStateMsg>>,
    /// Per-sender ordered executors for inbound proofs.
    pub(crate) verify_ch: DashMap<Address, mpsc::Sender<WorkProofMsg>>,
    /// Per-peer latches released by matching state responses.
    pub(crate) peer_latch: DashMap<Address, Arc<Notify>>,
    /// Accumulated per-transaction confirm counts awaiting the batcher.
    pub(crate) tx_confirm: Mutex<HashMap<Hash, u64>>,
    /// Proof hash of the round currently being mined.
    pub(crate) current_proof_hash: RwLock<Option<Hash>>,
    /// The most recently assembled (sealed) candidate block.
    pub(crate) pending_block: Mutex<Option<Block>>,

    session: Mutex<Option<MiningSession>>,
    service_cancel: watch::Sender<bool>,
    service_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Build the worker and spawn its always-on loops (event dispatch,
    /// commit writer, confirm-count batcher). `events` is the receiving
    /// end of the channel the router feeds inbound messages into.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: MinerConfig,
        signer: Arc<ProofSigner>,
        chain: Arc<dyn ChainReader>,
        chain_writer: Arc<dyn ChainWriter>,
        proof_store: Arc<dyn ProofStore>,
        tx_source: Arc<dyn TxSource>,
        bus: Arc<dyn MsgBus>,
        events: mpsc::Receiver<WorkerEvent>,
    ) -> Arc<Self> {
        let (service_cancel, _) = watch::channel(false);

        let worker = Arc::new(Self {
            config: RwLock::new(config),
            engine: ProofEngine,
            signer: RwLock::new(signer),
            extra: RwLock::new(Vec::new()),
            chain,
            chain_writer,
            proof_store,
            tx_source,
            bus,
            pending_commits: Arc::new(WorkPending::new()),
            round_state: AtomicU8::new(RoundState::Idle as u8),
            mining: AtomicBool::new(false),
            history: Mutex::new(LruCache::new(nz(HISTORY_SIZE))),
            local_proofs: Mutex::new(LruCache::new(nz(LOCAL_PROOF_CACHE))),
            query_cache: Mutex::new(LruCache::new(nz(QUERY_CACHE))),
            verify_ch: DashMap::new(),
            peer_latch: DashMap::new(),
            tx_confirm: Mutex::new(HashMap::new()),
            current_proof_hash: RwLock::new(None),
            pending_block: Mutex::new(None),
            session: Mutex::new(None),
            service_cancel,
            service_tasks: Mutex::new(Vec::new()),
        });

        // Seed the history with the tip's proof hash so a restart still
        // recognizes its own last root.
        if let Ok(head) = worker.chain.current_header() {
            worker.history.lock().put(head.proof_hash, ());
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Arc::clone(&worker).event_loop(events)));
        tasks.push(tokio::spawn(Arc::clone(&worker).confirm_update_loop()));
        {
            let cfg = worker.config.read();
            tasks.push(tokio::spawn(Arc::clone(&worker.pending_commits).run(
                Arc::clone(&worker.chain_writer),
                Arc::clone(&worker.tx_source),
                worker.service_cancel.subscribe(),
                cfg.commit_tick,
                cfg.commit_budget,
            )));
        }
        *worker.service_tasks.lock() = tasks;
        worker
    }

    /// Begin issuing mining rounds.
    pub fn start_mining(self: &Arc<Self>) {
        let mut session = self.session.lock();
        if session.is_some() {
            return;
        }
        let (cancel, _) = watch::channel(false);
        let (confirmed_tx, confirmed_rx) = mpsc::channel(CONFIRMED_DEPTH);
        let cfg = self.config.read().clone();
        let unconfirmed = Arc::new(UnconfirmedProofs::new(
            confirmed_tx,
            cancel.subscribe(),
            cfg.wait_confirm_timeout,
        ));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Arc::clone(self).round_loop(
            confirmed_rx,
            cancel.subscribe(),
        )));
        {
            let unconfirmed = Arc::clone(&unconfirmed);
            let interval = cfg.unconfirmed_check_interval;
            tasks.push(tokio::spawn(async move {
                unconfirmed.run(interval).await;
            }));
        }

        *session = Some(MiningSession {
            unconfirmed,
            cancel,
            tasks,
        });
        self.mining.store(true, Ordering::SeqCst);
        info!("mining started");
    }

    /// Stop issuing rounds. Outstanding unconfirmed proofs are rolled
    /// back so their transactions return to the pool.
    pub async fn stop_mining(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };
        let _ = session.cancel.send(true);
        for task in session.tasks {
            let _ = task.await;
        }
        for work in session.unconfirmed.drain() {
            self.tx_source.work_ended(work.id, work.header.number, false);
        }
        self.mining.store(false, Ordering::SeqCst);
        self.set_round_state(RoundState::Idle);
        *self.current_proof_hash.write() = None;
        info!("mining stopped");
    }

    /// Tear the whole worker down.
    pub async fn shutdown(&self) {
        self.stop_mining().await;
        let _ = self.service_cancel.send(true);
        self.verify_ch.clear();
        let tasks: Vec<_> = self.service_tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    pub(crate) fn unconfirmed(&self) -> Option<Arc<UnconfirmedProofs>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.unconfirmed))
    }

    pub(crate) fn round_state(&self) -> RoundState {
        RoundState::from_u8(self.round_state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_round_state(&self, state: RoundState) {
        self.round_state.store(state as u8, Ordering::SeqCst);
    }

    pub fn coinbase(&self) -> Address {
        self.signer.read().address()
    }

    pub(crate) fn current_signer(&self) -> Arc<ProofSigner> {
        Arc::clone(&self.signer.read())
    }

    /// Swap the signing identity.
    pub fn set_signer(&self, signer: Arc<ProofSigner>) {
        *self.signer.write() = signer;
    }

    /// Set the user part of the header extra-data.
    pub fn set_extra(&self, extra: Vec<u8>) -> Result<(), WorkerError> {
        if extra.len() > MAX_EXTRA_DATA {
            return Err(WorkerError::ExtraTooLong {
                got: extra.len(),
                max: MAX_EXTRA_DATA,
            });
        }
        *self.extra.write() = extra;
        Ok(())
    }

    /// Tune the round size and period at runtime.
    pub fn set_opt(&self, max_txs: usize, period: std::time::Duration) {
        let mut config = self.config.write();
        config.block_max_txs = max_txs;
        config.block_period = period;
    }

    /// The most recently assembled candidate block, if any.
    pub fn pending_block(&self) -> Option<Block> {
        self.pending_block.lock().clone()
    }

    pub fn commit_queue(&self) -> &Arc<WorkPending> {
        &self.pending_commits
    }

    /// Inbound event pump: recover each message's sender and dispatch.
    /// Proofs go through a per-sender ordered executor so one peer's
    /// chain check stays strictly sequential.
    async fn event_loop(self: Arc<Self>, mut events: mpsc::Receiver<WorkerEvent>) {
        let mut cancel = self.service_cancel.subscribe();
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = cancel.changed() => break,
            };
            match event {
                WorkerEvent::Proof(msg) => {
                    match ProofSigner::recover_sender(&msg.proof.data(), &msg.sign) {
                        Ok(sender) => {
                            debug!(from = %hex::encode(sender), "work proof received");
                            self.dispatch_proof(msg, sender);
                        }
                        Err(err) => debug!(%err, "proof sender recovery failed"),
                    }
                }
                WorkerEvent::Confirm(msg) => {
                    match ProofSigner::recover_sender(&msg.confirm.data(), &msg.sign) {
                        Ok(sender) if sender != self.coinbase() => {
                            self.deal_confirm(&msg, sender);
                        }
                        Ok(_) => {}
                        Err(err) => debug!(%err, "confirm sender recovery failed"),
                    }
                }
                WorkerEvent::Query(msg) => {
                    match ProofSigner::recover_sender(&msg.query.data(), &msg.sign) {
                        Ok(sender) => self.deal_query_state(&msg, sender),
                        Err(err) => debug!(%err, "query sender recovery failed"),
                    }
                }
                WorkerEvent::Response(msg) => {
                    match ProofSigner::recover_sender(&msg.response.data(), &msg.sign) {
                        Ok(sender) => self.deal_response_state(&msg, sender),
                        Err(err) => debug!(%err, "response sender recovery failed"),
                    }
                }
            }
        }
    }

    /// Route a proof into its sender's ordered queue, creating the queue
    /// and its handler task on first contact.
    fn dispatch_proof(self: &Arc<Self>, msg: WorkProofMsg, sender: Address) {
        if let Some(ch) = self.verify_ch.get(&sender) {
            if let Err(err) = ch.try_send(msg) {
                warn!(peer = %hex::encode(sender), %err, "sender proof queue full, proof dropped");
            }
            return;
        }
        let (tx, mut rx) = mpsc::channel::<WorkProofMsg>(SENDER_QUEUE_DEPTH);
        let _ = tx.try_send(msg);
        self.verify_ch.insert(sender, tx);
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.deal_proof_event(event, sender).await;
            }
        });
    }
}

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("cache sizes are non-zero")
}
