//! End-to-end mining scenarios over the in-memory mesh.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braid_crypto::ProofSigner;
use braid_mempool::ports::TxSource;
use braid_node::{Node, NodeConfig};
use braid_router::InMemoryMesh;
use braid_storage::{
    BlockReceipts, ChainReader, ChainStore, ChainWriter, ProofStore, StateDb, StorageError,
    StorageResult,
};
use braid_types::{Block, Hash, ProofState, Receipt, Transaction};
use braid_worker::{StatePolicy, SyncEvent};

fn fast_config(threshold: usize) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.miner.block_period = Duration::from_millis(200);
    config.miner.confirm_threshold = Some(threshold);
    config.miner.wait_confirm_timeout = Duration::from_secs(10);
    config.miner.unconfirmed_check_interval = Duration::from_millis(100);
    config.miner.commit_tick = Duration::from_millis(50);
    config.miner.confirm_update_interval = Duration::from_millis(100);
    config
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn tx_hashes(txs: &[Transaction]) -> HashSet<Hash> {
    txs.iter().map(Transaction::hash).collect()
}

/// Single miner with no peers and a zero threshold: a round needs no
/// confirms and commits by itself.
#[tokio::test(flavor = "multi_thread")]
async fn single_miner_commits_pending_transactions() {
    let mesh = InMemoryMesh::new();
    let node = Node::build(fast_config(0), ProofSigner::random(), &mesh);
    node.router.set_accept_txs(true);

    let txs: Vec<Transaction> = (0u8..5).map(|i| Transaction::new(vec![i, 0xAA])).collect();
    let submitted = tx_hashes(&txs);
    node.submit_txs(txs);
    wait_for("5 txs pending", || node.pool.pending_count() == 5).await;

    node.miner.start();
    wait_for("block 1 committed", || {
        node.chain
            .current_header()
            .map(|h| h.number >= 1)
            .unwrap_or(false)
    })
    .await;

    let header = node.chain.header_by_number(1).unwrap().unwrap();
    let body = node.chain.body_by_hash(&header.hash()).unwrap().unwrap();
    assert_eq!(tx_hashes(&body.txs), submitted);

    // Every transaction moved pending → on-chain at number 1.
    for hash in &submitted {
        assert_eq!(node.pool.on_chain_number(hash), Some(1));
    }
    assert_eq!(node.pool.pending_count(), 0);

    // No peers were involved, so no peer proof state was recorded.
    assert!(node.proof_store.all().unwrap().is_empty());

    // The worker kept its last assembled candidate around.
    assert!(node.worker.pending_block().is_some());

    node.shutdown().await;
}

/// Two miners confirming each other with a threshold of one: both chains
/// advance, and each node tracks the other's proof chain.
#[tokio::test(flavor = "multi_thread")]
async fn two_peer_confirmation_advances_both_chains() {
    let mesh = InMemoryMesh::new();
    let node_a = Node::build(fast_config(1), ProofSigner::random(), &mesh);
    let node_b = Node::build(fast_config(1), ProofSigner::random(), &mesh);
    node_a.router.set_accept_txs(true);
    node_b.router.set_accept_txs(true);

    let tx = Transaction::new(vec![0x7A; 8]);
    let tx_hash = tx.hash();
    node_a.submit_txs(vec![tx]);
    wait_for("tx pending on A", || node_a.pool.pending_count() == 1).await;

    node_a.miner.start();
    node_b.miner.start();

    wait_for("both chains at 1+", || {
        let a = node_a
            .chain
            .current_header()
            .map(|h| h.number >= 1)
            .unwrap_or(false);
        let b = node_b
            .chain
            .current_header()
            .map(|h| h.number >= 1)
            .unwrap_or(false);
        a && b
    })
    .await;

    wait_for("proof chains tracked both ways", || {
        let a_of_b = node_a
            .proof_store
            .peer_proof(&node_b.address())
            .ok()
            .flatten()
            .map(|s| s.num >= 1)
            .unwrap_or(false);
        let b_of_a = node_b
            .proof_store
            .peer_proof(&node_a.address())
            .ok()
            .flatten()
            .map(|s| s.num >= 1)
            .unwrap_or(false);
        a_of_b && b_of_a
    })
    .await;

    wait_for("tx committed on A", || {
        node_a
            .chain
            .block_receipts_by_tx(&tx_hash)
            .ok()
            .flatten()
            .is_some()
    })
    .await;
    let found = node_a.chain.block_receipts_by_tx(&tx_hash).unwrap().unwrap();
    let receipt = found
        .receipts
        .iter()
        .find(|r| r.tx_hash == tx_hash)
        .unwrap();
    assert!(receipt.confirm_count >= 1);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

/// A proof that fails the verifier's checks draws a rejecting confirm,
/// and the emitter's round rolls back: transactions return to pending and
/// the chain does not advance.
#[tokio::test(flavor = "multi_thread")]
async fn rejected_proof_rolls_the_round_back() {
    let mesh = InMemoryMesh::new();
    // B verifies strictly; A's proofs will carry a state entry claiming a
    // root for B that B never produced.
    let mut config_b = fast_config(1);
    config_b.miner.state_policy = StatePolicy::Strict;
    let node_a = Node::build(fast_config(1), ProofSigner::random(), &mesh);
    let node_b = Node::build(config_b, ProofSigner::random(), &mesh);
    node_a.router.set_accept_txs(true);
    node_b.router.set_accept_txs(true);

    // Poison A's view of B's proof chain.
    node_a
        .proof_store
        .write_peer_proof(&ProofState {
            addr: node_b.address(),
            root: [0xBB; 32],
            num: 3,
        })
        .unwrap();

    let tx = Transaction::new(vec![1, 2, 3, 4]);
    let tx_hash = tx.hash();
    node_a.submit_txs(vec![tx]);
    wait_for("tx pending on A", || node_a.pool.pending_count() == 1).await;

    // Only A mines; B just verifies (and rejects).
    node_a.miner.start();

    // Give several rounds the chance to be rejected.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let head = node_a.chain.current_header().unwrap();
    assert_eq!(head.number, 0, "rejected rounds must not commit");
    assert_eq!(node_a.pool.on_chain_number(&tx_hash), None);
    wait_for("tx back in pending on A", || {
        node_a.pool.get_tx_by_hash(&tx_hash).is_some()
    })
    .await;

    node_a.shutdown().await;
    node_b.shutdown().await;
}

/// A peer that missed part of a proof chain back-fills it with a state
/// query before voting, and its stored endpoint catches up monotonically.
#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_catches_up_via_state_query() {
    let mesh = InMemoryMesh::new();
    let node_a = Node::build(fast_config(0), ProofSigner::random(), &mesh);
    node_a.router.set_accept_txs(true);
    node_a.miner.start();

    // A mines alone for a few blocks; nobody hears those proofs.
    wait_for("A at number 3+", || {
        node_a
            .chain
            .current_header()
            .map(|h| h.number >= 3)
            .unwrap_or(false)
    })
    .await;

    // B joins late and only sees proofs from here on.
    let node_b = Node::build(fast_config(1), ProofSigner::random(), &mesh);
    node_b.router.set_accept_txs(true);

    wait_for("B tracks A's chain", || {
        node_b
            .proof_store
            .peer_proof(&node_a.address())
            .ok()
            .flatten()
            .map(|s| s.num >= 4)
            .unwrap_or(false)
    })
    .await;

    let tracked = node_b
        .proof_store
        .peer_proof(&node_a.address())
        .unwrap()
        .unwrap();
    let header = node_a
        .chain
        .header_by_number(tracked.num)
        .unwrap()
        .expect("tracked number is on A's chain");
    assert_eq!(tracked.root, header.proof_hash);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

/// Wraps the node's chain store (bound after wiring) and fails exactly
/// one write at a chosen height.
struct FlakyWriter {
    inner: std::sync::Mutex<Option<Arc<ChainStore>>>,
    fail_number: u64,
    failures: AtomicU32,
}

impl FlakyWriter {
    fn new(fail_number: u64) -> Self {
        Self {
            inner: std::sync::Mutex::new(None),
            fail_number,
            failures: AtomicU32::new(0),
        }
    }

    fn bind(&self, chain: Arc<ChainStore>) {
        *self.inner.lock().unwrap() = Some(chain);
    }

    fn chain(&self) -> Arc<ChainStore> {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .expect("writer bound before mining starts")
    }
}

impl ChainWriter for FlakyWriter {
    fn write_block_and_state(
        &self,
        block: &Block,
        receipts: &[Receipt],
        state: &StateDb,
    ) -> StorageResult<()> {
        if block.number() == self.fail_number && self.failures.load(Ordering::SeqCst) == 0 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::WriteChainFailed("injected failure".into()));
        }
        self.chain().write_block_and_state(block, receipts, state)
    }

    fn write_block_receipts(&self, updates: Vec<BlockReceipts>) -> StorageResult<()> {
        self.chain().write_block_receipts(updates)
    }
}

/// A failed chain write freezes mining, rolls back the queued round, and
/// once the queue drains the miner heals and re-mines the same height.
#[tokio::test(flavor = "multi_thread")]
async fn commit_failure_freezes_then_heals() {
    let mesh = InMemoryMesh::new();
    let flaky = Arc::new(FlakyWriter::new(2));
    let node = Node::build_with(
        fast_config(0),
        ProofSigner::random(),
        &mesh,
        Some(Arc::clone(&flaky) as Arc<dyn ChainWriter>),
    );
    flaky.bind(Arc::clone(&node.chain));
    node.router.set_accept_txs(true);
    node.miner.start();

    wait_for("chain heals past the failed write", || {
        node.chain
            .current_header()
            .map(|h| h.number >= 3)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 1);

    node.shutdown().await;
}

/// A starting sync pauses the miner; completion resumes it.
#[tokio::test(flavor = "multi_thread")]
async fn sync_pauses_and_resumes_mining() {
    let mesh = InMemoryMesh::new();
    let node = Node::build(fast_config(0), ProofSigner::random(), &mesh);
    node.router.set_accept_txs(true);
    node.miner.start();

    wait_for("first block mined", || {
        node.chain
            .current_header()
            .map(|h| h.number >= 1)
            .unwrap_or(false)
    })
    .await;

    node.sync_events.send(SyncEvent::Started).unwrap();
    wait_for("mining paused", || !node.worker.is_mining()).await;
    // At most the round already in flight may still commit.
    let frozen = node.chain.current_header().unwrap().number;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let paused_height = node.chain.current_header().unwrap().number;
    assert!(paused_height <= frozen + 1);

    node.sync_events.send(SyncEvent::Done).unwrap();
    wait_for("mining resumed", || node.worker.is_mining()).await;
    wait_for("chain advances again", || {
        node.chain
            .current_header()
            .map(|h| h.number > paused_height)
            .unwrap_or(false)
    })
    .await;

    node.shutdown().await;
}

/// A proof that never gathers its quorum times out; the round ends
/// unconfirmed and its transactions return to pending.
#[tokio::test(flavor = "multi_thread")]
async fn confirm_timeout_returns_transactions_to_pending() {
    let mesh = InMemoryMesh::new();
    let mut config = fast_config(1);
    config.miner.wait_confirm_timeout = Duration::from_millis(300);
    let node = Node::build(config, ProofSigner::random(), &mesh);
    node.router.set_accept_txs(true);

    let tx = Transaction::new(vec![9, 9, 9]);
    let tx_hash = tx.hash();
    node.submit_txs(vec![tx]);
    wait_for("tx pending", || node.pool.pending_count() == 1).await;

    // No peers exist, so no confirm can ever arrive.
    node.miner.start();

    wait_for("round timed out and tx returned", || {
        let head_zero = node
            .chain
            .current_header()
            .map(|h| h.number == 0)
            .unwrap_or(false);
        head_zero && node.pool.get_tx_by_hash(&tx_hash).is_some()
    })
    .await;
    assert_eq!(node.pool.on_chain_number(&tx_hash), None);

    node.shutdown().await;
}
