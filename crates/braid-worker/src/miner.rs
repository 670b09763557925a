//! Miner supervision: start/stop with pause-on-sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braid_crypto::ProofSigner;
use tokio::sync::broadcast;
use tracing::info;

use crate::errors::WorkerError;
use crate::ports::SyncEvent;
use crate::worker::Worker;

/// Supervises the worker: operator start/stop plus automatic pausing
/// while the chain synchronizer runs.
pub struct Miner {
    worker: Arc<Worker>,
    sync_events: broadcast::Sender<SyncEvent>,
    /// Whether mining may run right now (no sync in progress).
    can_start: AtomicBool,
    /// Whether mining should resume once the sync finishes.
    should_start: AtomicBool,
    mining: AtomicBool,
    control_started: AtomicBool,
}

impl Miner {
    pub fn new(worker: Arc<Worker>, sync_events: broadcast::Sender<SyncEvent>) -> Arc<Self> {
        Arc::new(Self {
            worker,
            sync_events,
            can_start: AtomicBool::new(true),
            should_start: AtomicBool::new(false),
            mining: AtomicBool::new(false),
            control_started: AtomicBool::new(false),
        })
    }

    /// Start mining (or arm it to start as soon as the current sync
    /// finishes).
    pub fn start(self: &Arc<Self>) {
        if !self.control_started.swap(true, Ordering::SeqCst) {
            let miner = Arc::clone(self);
            let events = self.sync_events.subscribe();
            tokio::spawn(async move {
                miner.work_control(events).await;
            });
        }
        self.should_start.store(true, Ordering::SeqCst);
        if !self.can_start.load(Ordering::SeqCst) {
            info!("network syncing, miner will start afterwards");
            return;
        }
        self.mining.store(true, Ordering::SeqCst);
        self.worker.start_mining();
    }

    pub async fn stop(&self) {
        self.worker.stop_mining().await;
        self.mining.store(false, Ordering::SeqCst);
        self.should_start.store(false, Ordering::SeqCst);
        info!("miner stopped");
    }

    pub fn mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    pub fn set_opt(&self, max_txs: usize, period: Duration) {
        self.worker.set_opt(max_txs, period);
    }

    pub fn set_signer(&self, signer: Arc<ProofSigner>) {
        self.worker.set_signer(signer);
    }

    pub fn set_extra(&self, extra: Vec<u8>) -> Result<(), WorkerError> {
        self.worker.set_extra(extra)
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Track synchronizer progress: a starting sync pauses mining and
    /// latches the restart flag; completion (or failure) restarts mining
    /// if it was armed.
    async fn work_control(self: &Arc<Self>, mut events: broadcast::Receiver<SyncEvent>) {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Started) => {
                    self.can_start.store(false, Ordering::SeqCst);
                    if self.mining() {
                        self.worker.stop_mining().await;
                        self.mining.store(false, Ordering::SeqCst);
                        self.should_start.store(true, Ordering::SeqCst);
                        info!("mining aborted due to sync");
                    }
                }
                Ok(SyncEvent::Done) | Ok(SyncEvent::Failed) => {
                    let should_start = self.should_start.swap(false, Ordering::SeqCst);
                    self.can_start.store(true, Ordering::SeqCst);
                    if should_start {
                        self.mining.store(true, Ordering::SeqCst);
                        self.worker.start_mining();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
