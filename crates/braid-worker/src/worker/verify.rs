//! Inbound proof verification, state query/response, and the
//! confirm-count batcher.

use std::collections::HashSet;
use std::sync::Arc;

use braid_storage::BlockReceipts;
use braid_types::{
    Address, ConfirmMsg, Hash, ProofConfirm, ProofSignature, ProofState, QueryState,
    QueryStateMsg, ResponseState, ResponseStateMsg, Transaction, WorkProofMsg,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::errors::{WorkerError, WorkerResult};
use crate::ports::OutboundEvent;
use crate::worker::Worker;

impl Worker {
    /// Handle one peer proof. Runs on the sender's ordered executor, so
    /// for a given peer these steps are strictly sequential and the stored
    /// `(num, root)` advances one verified link at a time.
    pub(crate) async fn deal_proof_event(self: &Arc<Self>, ev: WorkProofMsg, sender: Address) {
        let coinbase = self.coinbase();
        if sender == coinbase {
            return;
        }

        // Roots this node recently produced, for the state membership
        // check.
        let mut past: HashSet<Hash> = {
            let history = self.history.lock();
            history.iter().map(|(hash, _)| *hash).collect()
        };
        if self.is_mining() {
            if let Some(current) = *self.current_proof_hash.read() {
                past.insert(current);
            }
        }
        let policy = self.config.read().state_policy;
        if !self
            .engine
            .verify_state(policy, &coinbase, &past, &ev.proof)
        {
            debug!(peer = %hex::encode(sender), "proof state check failed");
            self.send_confirm(&ev.proof.sign, false);
            return;
        }

        let ev_number = ev.proof.number;
        if ev_number == 0 {
            // Number zero is genesis; no peer legitimately proves it.
            self.send_confirm(&ev.proof.sign, false);
            return;
        }
        let mut peer_state = match self.proof_store.peer_proof(&sender) {
            Ok(state) => state,
            Err(err) => {
                warn!(peer = %hex::encode(sender), %err, "peer proof read failed");
                None
            }
        };

        // No stored endpoint for this peer yet: its first proof chains off
        // genesis, anything later needs a state query round-trip first.
        if peer_state.is_none() {
            if ev_number == 1 {
                match self.chain.header_by_number(0) {
                    Ok(Some(genesis)) => {
                        peer_state = Some(ProofState {
                            addr: sender,
                            root: genesis.proof_hash,
                            num: 0,
                        });
                    }
                    _ => {
                        self.send_confirm(&ev.proof.sign, false);
                        return;
                    }
                }
            } else {
                debug!(peer = %hex::encode(sender), number = ev_number - 1, "querying missing peer state");
                if self.query_remote_state(sender, ev_number - 1).await.is_ok() {
                    peer_state = self.proof_store.peer_proof(&sender).ok().flatten();
                }
                if peer_state.is_none() {
                    self.send_confirm(&ev.proof.sign, false);
                    return;
                }
            }
        }
        let mut peer_state = peer_state.expect("checked above");

        // Advance the peer's chain one step, back-filling missed numbers
        // through query/response until the link verifies or genuinely
        // disagrees.
        let accepted = loop {
            match self
                .engine
                .verify_proof(&sender, &peer_state.root, &ev.proof)
            {
                Ok(new_root) => {
                    let update = ProofState {
                        addr: sender,
                        root: new_root,
                        num: ev_number,
                    };
                    if let Err(err) = self.proof_store.write_peer_proof(&update) {
                        warn!(peer = %hex::encode(sender), %err, "peer proof write failed");
                    }
                    break true;
                }
                Err(_) => {
                    if peer_state.num + 1 == ev_number {
                        // Same height, different root: a real disagreement.
                        debug!(
                            peer = %hex::encode(sender),
                            number = ev_number,
                            "proof chain check failed"
                        );
                        break false;
                    }
                    if self.query_remote_state(sender, ev_number - 1).await.is_err() {
                        break false;
                    }
                    match self.proof_store.peer_proof(&sender) {
                        Ok(Some(state)) => peer_state = state,
                        _ => break false,
                    }
                }
            }
        };

        self.send_confirm(&ev.proof.sign, accepted);
        if !accepted {
            return;
        }

        // Accepted: pull the proof's transactions into our pool and count
        // one confirm for each.
        let txs: Vec<Transaction> = ev.proof.txs.iter().map(Transaction::clone).collect();
        self.tx_source.add_remote_txs(txs);
        let mut confirm_pool = self.tx_confirm.lock();
        for tx in &ev.proof.txs {
            *confirm_pool.entry(tx.hash()).or_insert(0) += 1;
        }
    }

    /// Sign and broadcast a verdict for a peer's proof.
    pub(crate) fn send_confirm(&self, proof_sign: &ProofSignature, accepted: bool) {
        let confirm = ProofConfirm {
            signature: proof_sign.clone(),
            confirm: accepted,
        };
        let signer = self.current_signer();
        match signer.sign_data(&confirm.data()) {
            Ok(sign) => {
                debug!(accepted, proof = %hex::encode(confirm.signature.hash()), "confirm sent");
                self.bus
                    .post(OutboundEvent::Confirm(ConfirmMsg { confirm, sign }));
            }
            Err(err) => debug!(%err, "confirm signing failed"),
        }
    }

    /// A peer's verdict over one of our proofs.
    pub(crate) fn deal_confirm(&self, ev: &ConfirmMsg, sender: Address) {
        let sig_hash = ev.confirm.signature.hash();
        if self.local_proofs.lock().contains(&sig_hash) {
            debug!(
                from = %hex::encode(sender),
                proof = %hex::encode(sig_hash),
                accepted = ev.confirm.confirm,
                "confirm received"
            );
            if let Some(unconfirmed) = self.unconfirmed() {
                unconfirmed.confirm(sender, &ev.confirm);
            }
        }
    }

    /// Serve a peer's request for a proof root: our own comes from the
    /// chain, another miner's only from a matching stored endpoint.
    pub(crate) fn deal_query_state(&self, ev: &QueryStateMsg, sender: Address) {
        let query = &ev.query;
        let root = if query.miner == self.coinbase() {
            match self.chain.header_by_number(query.number) {
                Ok(Some(header)) => header.proof_hash,
                _ => {
                    debug!(number = query.number, "queried header not found");
                    return;
                }
            }
        } else {
            match self.proof_store.peer_proof(&query.miner) {
                Ok(Some(state)) if state.num == query.number => state.root,
                _ => return,
            }
        };

        let response = ResponseState {
            number: query.number,
            root,
            querier: sender,
        };
        let signer = self.current_signer();
        match signer.sign_data(&response.data()) {
            Ok(sign) => {
                self.bus
                    .post(OutboundEvent::Response(ResponseStateMsg { response, sign }));
            }
            Err(err) => debug!(%err, "response signing failed"),
        }
    }

    /// A peer's answer to one of our state queries. Only accepted when it
    /// matches the in-flight query for that peer; then the stored endpoint
    /// moves and the waiting proof handler is released.
    pub(crate) fn deal_response_state(&self, ev: &ResponseStateMsg, sender: Address) {
        if ev.response.querier != self.coinbase() {
            return;
        }
        let expected = {
            let mut cache = self.query_cache.lock();
            cache.get(&sender).map(|msg| msg.query.number)
        };
        let Some(expected_number) = expected else {
            return;
        };
        if ev.response.number != expected_number {
            debug!(
                from = %hex::encode(sender),
                number = ev.response.number,
                expected = expected_number,
                "unmatched state response"
            );
            return;
        }

        let state = ProofState {
            addr: sender,
            root: ev.response.root,
            num: ev.response.number,
        };
        if let Err(err) = self.proof_store.write_peer_proof(&state) {
            warn!(peer = %hex::encode(sender), %err, "peer proof write failed");
            return;
        }
        debug!(peer = %hex::encode(sender), num = state.num, "peer proof updated");
        if let Some(latch) = self.peer_latch.get(&sender) {
            latch.notify_one();
        }
    }

    /// Ask `miner` for its proof root at `number` and wait (bounded) for
    /// the answer to land in the proof store.
    pub(crate) async fn query_remote_state(&self, miner: Address, number: u64) -> WorkerResult<()> {
        let query = QueryState { miner, number };
        let signer = self.current_signer();
        let msg = QueryStateMsg {
            sign: signer.sign_data(&query.data())?,
            query,
        };
        self.query_cache.lock().put(miner, msg.clone());

        let latch = self
            .peer_latch
            .entry(miner)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        let notified = latch.notified();
        self.bus.post(OutboundEvent::Query(msg));

        let timeout = self.config.read().wait_confirm_timeout;
        match tokio::time::timeout(timeout, notified).await {
            Ok(()) => Ok(()),
            Err(_) => {
                debug!(peer = %hex::encode(miner), number, "state query timed out");
                Err(WorkerError::QueryTimeout)
            }
        }
    }

    /// Batch accumulated confirm counts into the stored receipts. Runs
    /// once a second; a pass consumes at most the configured batch size.
    pub(crate) async fn confirm_update_loop(self: Arc<Self>) {
        let interval = self.config.read().confirm_update_interval;
        let mut cancel = self.service_cancel.subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.update_tx_confirm(),
                _ = cancel.changed() => break,
            }
        }
    }

    pub(crate) fn update_tx_confirm(&self) {
        let batch_limit = self.config.read().confirm_update_batch;
        let mut pool = self.tx_confirm.lock();
        if pool.is_empty() {
            return;
        }
        let mut consumed = 0usize;
        let mut updates: Vec<BlockReceipts> = Vec::new();
        let hashes: Vec<Hash> = pool.keys().copied().collect();
        for hash in hashes {
            if !pool.contains_key(&hash) {
                continue;
            }
            // Entries whose transaction is not on chain yet stay pooled
            // for a later pass.
            let Ok(Some(mut block_receipts)) = self.chain.block_receipts_by_tx(&hash) else {
                continue;
            };
            for receipt in &mut block_receipts.receipts {
                if let Some(count) = pool.remove(&receipt.tx_hash) {
                    receipt.confirm_count += count;
                    consumed += 1;
                }
            }
            updates.push(block_receipts);
            if consumed > batch_limit {
                break;
            }
        }
        if updates.is_empty() {
            return;
        }
        if let Err(err) = self.chain_writer.write_block_receipts(updates) {
            warn!(%err, "confirm count batch write failed");
        }
    }
}
