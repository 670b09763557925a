//! # Braid Node
//!
//! Wires the braidchain subsystems into a running node: storage under the
//! chain and peer-proof stores, the transaction pool, the mining worker
//! and its supervisor, and the router on top of a transport.

pub mod config;
pub mod container;

pub use config::NodeConfig;
pub use container::Node;
