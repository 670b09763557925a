//! The transport port.

use braid_types::{Address, Hash, NetMessage, NodeRole};

/// A connected peer as the router sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: Address,
    pub role: NodeRole,
}

/// What the router needs from the P2P layer.
pub trait Transport: Send + Sync {
    /// Send to one peer. Best-effort; failures are the transport's
    /// problem.
    fn send(&self, peer: &Address, msg: &NetMessage);

    /// Send to every connected peer the predicate does not exclude.
    fn broadcast_except(&self, msg: &NetMessage, exclude: &dyn Fn(&PeerInfo) -> bool);

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerInfo>;

    /// This node's role.
    fn local_role(&self) -> NodeRole;

    /// Record that `peer` has seen the transaction, so later broadcasts
    /// can skip it.
    fn mark_known_tx(&self, peer: &Address, tx_hash: &Hash);

    /// Peers not yet known to have the transaction.
    fn peers_without_tx(&self, tx_hash: &Hash) -> Vec<PeerInfo>;
}
