//! Round driving: start checks, the new-round build, and final commit.

use std::sync::Arc;

use braid_types::{Header, NodeRole, WorkProofMsg};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::engine::unix_ms;
use crate::errors::{WorkerError, WorkerResult};
use crate::ports::OutboundEvent;
use crate::work::{RoundState, Work};
use crate::worker::Worker;

impl Worker {
    /// The round loop. A 10 ms ticker checks whether a new round should
    /// start; quorum verdicts come back over `confirmed_rx` and finish the
    /// round either way.
    pub(crate) async fn round_loop(
        self: Arc<Self>,
        mut confirmed_rx: mpsc::Receiver<Work>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let tick = self.config.read().round_tick;
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Holding at most one parent preserves the Idle → PostMining →
        // Mining hop even though both halves run on this task.
        let (parent_tx, mut parent_rx) = mpsc::channel::<Header>(1);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.round_state() == RoundState::Idle {
                        if let Some(parent) = self.check_need_start_mine() {
                            self.set_round_state(RoundState::PostMining);
                            if parent_tx.try_send(parent).is_err() {
                                self.set_round_state(RoundState::Idle);
                            }
                        }
                    }
                }
                Some(parent) = parent_rx.recv() => {
                    debug!(parent = parent.number, "round starting");
                    self.set_round_state(RoundState::Mining);
                    if let Err(err) = self.new_mine_round(&parent) {
                        error!(%err, "round start failed");
                        self.set_round_state(RoundState::Idle);
                    }
                }
                Some(work) = confirmed_rx.recv() => {
                    if let Err(err) = self.final_mine(work).await {
                        debug!(%err, "round discarded");
                    }
                    *self.current_proof_hash.write() = None;
                    self.set_round_state(RoundState::Idle);
                }
                _ = cancel.changed() => break,
            }
        }
    }

    /// Decide whether a new round should start, and pick its parent: the
    /// newest uncommitted round if any, else the chain tip.
    ///
    /// While the commit queue is errored no round starts; once it has
    /// drained the error clears and mining resumes.
    pub(crate) fn check_need_start_mine(&self) -> Option<Header> {
        if self.pending_commits.have_err() {
            if self.pending_commits.is_empty() {
                self.pending_commits.set_no_error();
            } else {
                return None;
            }
        }
        let head = match self.pending_commits.top_header() {
            Some(header) => header,
            None => match self.chain.current_header() {
                Ok(header) => header,
                Err(err) => {
                    error!(%err, "no chain head available");
                    return None;
                }
            },
        };
        let config = self.config.read();
        let delta_ms = unix_ms().saturating_sub(head.time_ms);
        let period_ms = config.block_period.as_millis() as u64;
        let early_ms = config.early_round_delta.as_millis() as u64;
        if delta_ms >= period_ms
            || (self.tx_source.pending_count() >= config.min_txs_to_mine && delta_ms > early_ms)
        {
            return Some(head);
        }
        None
    }

    /// Build this round: drain the pool, execute, chain and sign the
    /// proof, broadcast it, register for confirms, and finalize the block
    /// in parallel.
    pub(crate) fn new_mine_round(self: &Arc<Self>, parent: &Header) -> WorkerResult<()> {
        if self.bus.local_role() == NodeRole::BootNode {
            return Ok(());
        }
        let config = self.config.read().clone();
        let signer = self.current_signer();

        let mut header = Header {
            parent_hash: parent.hash(),
            coinbase: signer.address(),
            number: parent.number + 1,
            extra: self.extra.read().clone(),
            ..Default::default()
        };
        self.engine.prepare_header(&mut header);

        let state = self.chain.state_at(parent.state_root)?;
        // Snapshot every mining peer's verified proof-chain endpoint into
        // the round.
        let mut states = Vec::new();
        for peer in self.bus.mine_peers() {
            match self.proof_store.peer_proof(&peer) {
                Ok(Some(proof_state)) => states.push(proof_state),
                Ok(None) => {}
                Err(err) => debug!(peer = %hex::encode(peer), %err, "peer proof read failed"),
            }
        }

        let mut work = Work::new(now_nanos(), header, state, states);
        let drained = self.tx_source.take_pending(work.id, config.block_max_txs);
        let drained_count = drained.len();
        work.commit_transactions(drained);

        let owned_txs = work.owned_txs();
        let proof = match self.engine.generate_proof(
            &signer,
            &mut work.header,
            parent,
            &owned_txs,
            &work.states,
        ) {
            Ok(proof) => proof,
            Err(err) => {
                self.tx_source.work_ended(work.id, work.header.number, false);
                return Err(err);
            }
        };
        let msg_sign = match signer.sign_data(&proof.data()) {
            Ok(sign) => sign,
            Err(err) => {
                self.tx_source.work_ended(work.id, work.header.number, false);
                return Err(err.into());
            }
        };
        info!(
            number = work.header.number,
            txs = work.txs.len(),
            drained = drained_count,
            "round built"
        );

        // Remember the proof as ours so inbound confirms are recognized.
        self.local_proofs.lock().put(proof.sign.hash(), ());
        *self.current_proof_hash.write() = Some(work.header.proof_hash);

        // Generate the sealed block off the round loop; final_mine picks
        // the result up through the work's oneshot.
        let (gen_tx, gen_rx) = tokio::sync::oneshot::channel();
        work.gen_rx = Some(gen_rx);
        {
            let worker = Arc::clone(self);
            let header = work.header.clone();
            let state_root = work.state.commit();
            let states = work.states.clone();
            let receipts = work.receipts.clone();
            tokio::spawn(async move {
                let signer = worker.current_signer();
                let block = worker
                    .engine
                    .finalize(header, state_root, owned_txs, states, &receipts);
                let sealed = worker.engine.seal_block(&signer, block);
                if let Ok(block) = &sealed {
                    *worker.pending_block.lock() = Some(block.clone());
                }
                let _ = gen_tx.send(sealed);
            });
        }

        match self.unconfirmed() {
            Some(unconfirmed) => {
                // Register before the proof leaves, so even an instant
                // confirm finds its entry.
                let sig_hash = proof.sign.hash();
                let threshold = config.threshold();
                unconfirmed.insert(sig_hash, work, threshold);
                self.bus.post(OutboundEvent::Proof(WorkProofMsg {
                    proof,
                    sign: msg_sign,
                }));
            }
            None => {
                // Mining stopped between the tick and here; roll back.
                self.tx_source.work_ended(work.id, work.header.number, false);
            }
        }
        Ok(())
    }

    /// Complete a round once its verdict is in: wait for the generated
    /// block and hand it to the commit queue, or roll everything back.
    pub(crate) async fn final_mine(&self, mut work: Work) -> WorkerResult<()> {
        if !work.confirmed {
            self.round_failed(&work);
            return Err(WorkerError::NotConfirmed);
        }
        let Some(gen_rx) = work.gen_rx.take() else {
            self.round_failed(&work);
            return Err(WorkerError::Generation("no generation pending".into()));
        };
        match gen_rx.await {
            Ok(Ok(block)) => {
                self.history.lock().put(block.proof_hash(), ());
                work.block = Some(block);
                match self.pending_commits.add(work) {
                    Ok(()) => Ok(()),
                    Err(work) => {
                        self.round_failed(&work);
                        Err(WorkerError::PendingRollback)
                    }
                }
            }
            Ok(Err(err)) => {
                self.round_failed(&work);
                Err(err)
            }
            Err(_) => {
                self.round_failed(&work);
                Err(WorkerError::Generation("generation task gone".into()))
            }
        }
    }

    fn round_failed(&self, work: &Work) {
        self.tx_source.work_ended(work.id, work.header.number, false);
    }
}

/// Monotonic-enough round ticket: nanoseconds since the unix epoch.
fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
