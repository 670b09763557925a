//! Node configuration.

use braid_mempool::MempoolConfig;
use braid_router::RouterConfig;
use braid_types::{keccak256, Hash, NodeRole};
use braid_worker::MinerConfig;

/// Complete configuration of one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Chain identifier; nodes on different chains derive different
    /// genesis proof seeds and never verify each other's chains.
    pub chain_id: u64,
    /// Role this node plays in the network.
    pub role: NodeRole,
    pub mempool: MempoolConfig,
    pub miner: MinerConfig,
    pub router: RouterConfig,
}

impl NodeConfig {
    /// The genesis proof hash every proof chain on this network hangs
    /// from.
    pub fn genesis_proof_seed(&self) -> Hash {
        let mut data = Vec::with_capacity(22);
        data.extend_from_slice(b"braid-genesis/");
        data.extend_from_slice(&self.chain_id.to_be_bytes());
        keccak256(&data)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            role: NodeRole::MineNode,
            mempool: MempoolConfig::default(),
            miner: MinerConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_seed_depends_on_chain_id() {
        let a = NodeConfig {
            chain_id: 1,
            ..Default::default()
        };
        let b = NodeConfig {
            chain_id: 2,
            ..Default::default()
        };
        assert_ne!(a.genesis_proof_seed(), b.genesis_proof_seed());
        assert_eq!(a.genesis_proof_seed(), a.genesis_proof_seed());
    }
}
