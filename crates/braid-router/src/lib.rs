//! # Braid Router
//!
//! Demultiplexes inbound peer messages, enforces the per-code rebroadcast
//! budget, batches transactions into the pool, and carries the worker's
//! outbound messages onto the transport.
//!
//! Mining traffic (proofs, confirms, state queries/responses) is never
//! relayed to boot nodes, and each distinct message is re-emitted at most
//! a fixed number of times before duplicates are dropped silently.

pub mod config;
pub mod mesh;
pub mod ports;
pub mod router;

pub use config::RouterConfig;
pub use mesh::{InMemoryMesh, MeshHandle};
pub use ports::{PeerInfo, Transport};
pub use router::Router;
