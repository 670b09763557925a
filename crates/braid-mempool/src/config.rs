//! Mempool configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Number of ingest channel pairs, each with its own worker pair.
    pub ingest_slots: usize,
    /// Capacity of each ingest and verify channel.
    pub slot_depth: usize,
    /// Capacity of the invalid-transaction channel.
    pub invalid_depth: usize,
    /// Size bound of the recently-seen set; cleared when exceeded.
    pub max_known_txs: usize,
    /// How many blocks behind the head an on-chain entry may trail before
    /// eviction.
    pub pool_block_count: u64,
    /// Interval of the on-chain eviction pass.
    pub evict_interval: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            ingest_slots: 4,
            slot_depth: 100_000,
            invalid_depth: 100_000,
            max_known_txs: 2_000_000,
            pool_block_count: 100,
            evict_interval: Duration::from_secs(60),
        }
    }
}
