//! In-memory mesh transport.
//!
//! Stands in for the real P2P stack in tests and single-process clusters:
//! every joined node gets an inbox; sends pass through the wire codec so
//! anything not serialized (like the forward bit) is genuinely lost in
//! transit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use braid_types::{Address, Hash, NetMessage, NodeRole};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

use crate::ports::{PeerInfo, Transport};

struct MeshNode {
    role: NodeRole,
    inbox: mpsc::UnboundedSender<(Address, NetMessage)>,
    known_txs: Arc<Mutex<HashSet<Hash>>>,
}

/// A process-local mesh of nodes.
#[derive(Default)]
pub struct InMemoryMesh {
    nodes: RwLock<HashMap<Address, MeshNode>>,
}

impl InMemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the mesh; the returned receiver yields `(from, message)`
    /// pairs for the node's router loop.
    pub fn join(
        self: &Arc<Self>,
        addr: Address,
        role: NodeRole,
    ) -> (MeshHandle, mpsc::UnboundedReceiver<(Address, NetMessage)>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        self.nodes.write().insert(
            addr,
            MeshNode {
                role,
                inbox,
                known_txs: Arc::new(Mutex::new(HashSet::new())),
            },
        );
        (
            MeshHandle {
                mesh: Arc::clone(self),
                local: addr,
            },
            rx,
        )
    }

    pub fn disconnect(&self, addr: &Address) {
        self.nodes.write().remove(addr);
    }

    fn deliver(&self, from: Address, to: &Address, msg: &NetMessage) {
        let nodes = self.nodes.read();
        let Some(node) = nodes.get(to) else {
            return;
        };
        // Round-trip the codec so delivery matches real wire behavior.
        let framed = match NetMessage::decode(&msg.encode()) {
            Ok(framed) => framed,
            Err(_) => return,
        };
        let _ = node.inbox.send((from, framed));
        trace!(from = %hex::encode(from), to = %hex::encode(to), "mesh delivery");
    }
}

/// One node's view of the mesh; the router's [`Transport`].
pub struct MeshHandle {
    mesh: Arc<InMemoryMesh>,
    local: Address,
}

impl MeshHandle {
    pub fn local_addr(&self) -> Address {
        self.local
    }
}

impl Transport for MeshHandle {
    fn send(&self, peer: &Address, msg: &NetMessage) {
        self.mesh.deliver(self.local, peer, msg);
    }

    fn broadcast_except(&self, msg: &NetMessage, exclude: &dyn Fn(&PeerInfo) -> bool) {
        let targets: Vec<Address> = {
            let nodes = self.mesh.nodes.read();
            nodes
                .iter()
                .filter(|(addr, _)| **addr != self.local)
                .filter(|(addr, node)| {
                    !exclude(&PeerInfo {
                        addr: **addr,
                        role: node.role,
                    })
                })
                .map(|(addr, _)| *addr)
                .collect()
        };
        for addr in targets {
            self.mesh.deliver(self.local, &addr, msg);
        }
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.mesh
            .nodes
            .read()
            .iter()
            .filter(|(addr, _)| **addr != self.local)
            .map(|(addr, node)| PeerInfo {
                addr: *addr,
                role: node.role,
            })
            .collect()
    }

    fn local_role(&self) -> NodeRole {
        self.mesh
            .nodes
            .read()
            .get(&self.local)
            .map(|node| node.role)
            .unwrap_or(NodeRole::MineNode)
    }

    fn mark_known_tx(&self, peer: &Address, tx_hash: &Hash) {
        if let Some(node) = self.mesh.nodes.read().get(peer) {
            node.known_txs.lock().insert(*tx_hash);
        }
    }

    fn peers_without_tx(&self, tx_hash: &Hash) -> Vec<PeerInfo> {
        self.mesh
            .nodes
            .read()
            .iter()
            .filter(|(addr, _)| **addr != self.local)
            .filter(|(_, node)| !node.known_txs.lock().contains(tx_hash))
            .map(|(addr, node)| PeerInfo {
                addr: *addr,
                role: node.role,
            })
            .collect()
    }
}
