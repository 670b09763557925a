//! Subsystem wiring.
//!
//! Components are created leaves-first (key-value store, chain and proof
//! stores, pool) and joined through their narrow ports: the router
//! implements the worker's message bus, the worker consumes the pool
//! through `TxSource`, and both sides of the chain go through the reader
//! and writer capabilities.

use std::sync::Arc;

use braid_crypto::ProofSigner;
use braid_mempool::{HeadSource, TxPool, TxSource};
use braid_router::{InMemoryMesh, Router, Transport};
use braid_sigpool::SigWorkerPool;
use braid_storage::{
    ChainReader, ChainStore, ChainWriter, InMemoryKvStore, PeerProofStore, ProofStore,
};
use braid_types::Address;
use braid_worker::{Miner, SyncEvent, Worker, WorkerEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::NodeConfig;

/// Depth of the router → worker event channel.
const WORKER_EVENT_DEPTH: usize = 1_024;

/// A fully wired node.
pub struct Node {
    config: NodeConfig,
    signer: Arc<ProofSigner>,
    pub chain: Arc<ChainStore>,
    pub proof_store: Arc<PeerProofStore>,
    pub pool: Arc<TxPool>,
    pub sigpool: Arc<SigWorkerPool>,
    pub worker: Arc<Worker>,
    pub miner: Arc<Miner>,
    pub router: Arc<Router>,
    pub sync_events: broadcast::Sender<SyncEvent>,
    recv_task: JoinHandle<()>,
}

/// Chain-head view handed to the pool's eviction pass.
struct ChainHead(Arc<ChainStore>);

impl HeadSource for ChainHead {
    fn head_number(&self) -> u64 {
        self.0
            .current_header()
            .map(|header| header.number)
            .unwrap_or(0)
    }
}

impl Node {
    /// Build a node joined to the given in-process mesh.
    pub fn build(config: NodeConfig, signer: ProofSigner, mesh: &Arc<InMemoryMesh>) -> Arc<Self> {
        Self::build_with(config, signer, mesh, None)
    }

    /// Build with an optional chain-writer override (tests inject write
    /// failures through it).
    pub fn build_with(
        config: NodeConfig,
        signer: ProofSigner,
        mesh: &Arc<InMemoryMesh>,
        writer_override: Option<Arc<dyn ChainWriter>>,
    ) -> Arc<Self> {
        let signer = Arc::new(signer);
        let address = signer.address();

        let kv = Arc::new(InMemoryKvStore::new());
        let chain = Arc::new(ChainStore::new(Arc::clone(&kv) as _));
        chain
            .ensure_genesis(config.genesis_proof_seed())
            .expect("genesis bootstrap never fails on a fresh store");
        let proof_store = Arc::new(PeerProofStore::new(kv as _));

        let pool = TxPool::start(
            config.mempool.clone(),
            Arc::new(ChainHead(Arc::clone(&chain))),
        );
        let sigpool = Arc::new(SigWorkerPool::new(None));

        let (transport, mesh_rx) = mesh.join(address, config.role);
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>(WORKER_EVENT_DEPTH);
        let router = Router::spawn(
            config.router.clone(),
            Arc::clone(&transport),
            event_tx,
            Arc::clone(&pool) as Arc<dyn TxSource>,
        );

        let chain_writer: Arc<dyn ChainWriter> =
            writer_override.unwrap_or_else(|| Arc::clone(&chain) as _);
        let worker = Worker::spawn(
            config.miner.clone(),
            Arc::clone(&signer),
            Arc::clone(&chain) as Arc<dyn ChainReader>,
            chain_writer,
            Arc::clone(&proof_store) as Arc<dyn ProofStore>,
            Arc::clone(&pool) as Arc<dyn TxSource>,
            Arc::clone(&router) as _,
            event_rx,
        );

        let (sync_events, _) = broadcast::channel(16);
        let miner = Miner::new(Arc::clone(&worker), sync_events.clone());

        // Pump mesh deliveries into the router. Proof envelopes get their
        // signatures screened off-thread on the way in; the worker still
        // performs the authoritative recovery.
        let recv_task = {
            let router = Arc::clone(&router);
            let sigpool = Arc::clone(&sigpool);
            let mut mesh_rx = mesh_rx;
            tokio::spawn(async move {
                while let Some((from, msg)) = mesh_rx.recv().await {
                    if let braid_types::NetMessage::WorkProof(proof_msg) = &msg {
                        let sig = proof_msg.sign.as_bytes();
                        if sig.len() == 65 {
                            let digest = braid_types::sha3_256(&proof_msg.proof.data());
                            sigpool.validate_async(
                                proof_msg.proof.sign.hash(),
                                &digest,
                                &sig[..32],
                                &sig[32..64],
                                sig[64],
                            );
                        }
                    }
                    router.handle_message(from, msg);
                }
            })
        };

        info!(address = %hex::encode(address), "node wired");
        Arc::new(Self {
            config,
            signer,
            chain,
            proof_store,
            pool,
            sigpool,
            worker,
            miner,
            router,
            sync_events,
            recv_task,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Submit locally created transactions: into the pool, and out to
    /// peers that have not seen them.
    pub fn submit_txs(&self, txs: Vec<braid_types::Transaction>) {
        self.router.route_txs(&txs);
        self.pool.add_txs(txs);
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Stop every subsystem, leaves last.
    pub async fn shutdown(&self) {
        self.miner.stop().await;
        self.worker.shutdown().await;
        self.router.shutdown().await;
        self.pool.stop().await;
        self.recv_task.abort();
    }
}
