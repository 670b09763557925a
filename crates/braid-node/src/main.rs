//! Braidchain node binary.
//!
//! Runs a self-contained mining node on an in-process mesh. The external
//! P2P stack plugs in through the same `Transport` port the mesh
//! implements.

use std::time::Duration;

use anyhow::Result;
use braid_crypto::{Keypair, ProofSigner};
use braid_node::{Node, NodeConfig};
use braid_router::InMemoryMesh;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "braid-node", about = "A federated-confirmation mining node")]
struct Args {
    /// Chain identifier.
    #[arg(long, default_value_t = 1)]
    chain_id: u64,

    /// Seconds between mining rounds.
    #[arg(long, default_value_t = 2)]
    period: u64,

    /// Maximum transactions per round.
    #[arg(long, default_value_t = 50_000)]
    max_txs: usize,

    /// Confirms required to commit a round (0 mines standalone).
    #[arg(long, default_value_t = 0)]
    threshold: usize,

    /// Hex-encoded 32-byte mining key; random when omitted.
    #[arg(long)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let keypair = match &args.key {
        Some(hex_key) => {
            let bytes: [u8; 32] = hex::decode(hex_key)?
                .try_into()
                .map_err(|_| anyhow::anyhow!("key must be 32 bytes of hex"))?;
            Keypair::from_bytes(bytes)?
        }
        None => Keypair::generate(),
    };
    let signer = ProofSigner::new(keypair);

    let mut config = NodeConfig {
        chain_id: args.chain_id,
        ..Default::default()
    };
    config.miner.block_period = Duration::from_secs(args.period);
    config.miner.block_max_txs = args.max_txs;
    config.miner.confirm_threshold = Some(args.threshold);

    let mesh = InMemoryMesh::new();
    let node = Node::build(config, signer, &mesh);
    info!(address = %hex::encode(node.address()), "braid node up");

    // No external sync subsystem in the standalone binary: open the tx
    // gate and mine immediately.
    node.router.set_accept_txs(true);
    node.miner.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.shutdown().await;
    Ok(())
}
