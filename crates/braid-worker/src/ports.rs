//! Ports between the worker and the rest of the node.

use braid_types::{
    Address, ConfirmMsg, NodeRole, QueryStateMsg, ResponseStateMsg, WorkProofMsg,
};

/// Inbound events delivered to the worker by the router.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Proof(WorkProofMsg),
    Confirm(ConfirmMsg),
    Query(QueryStateMsg),
    Response(ResponseStateMsg),
}

/// Outbound messages the worker asks the router to propagate.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Proof(WorkProofMsg),
    Confirm(ConfirmMsg),
    Query(QueryStateMsg),
    Response(ResponseStateMsg),
}

/// The worker's view of the network layer.
pub trait MsgBus: Send + Sync {
    /// Hand a message to the propagation layer. Must not block.
    fn post(&self, event: OutboundEvent);

    /// Addresses of currently connected mining peers.
    fn mine_peers(&self) -> Vec<Address>;

    /// This node's role.
    fn local_role(&self) -> NodeRole;
}

/// Progress of the (external) chain synchronizer; mining pauses while a
/// sync is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Done,
    Failed,
}
