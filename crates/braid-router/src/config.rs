//! Router configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How many times one distinct message is re-emitted before further
    /// duplicates are dropped.
    pub rebroadcast_budget: u32,
    /// Entries per rebroadcast dedup cache.
    pub dedup_cache_size: usize,
    /// Flush interval of the transaction batcher.
    pub batch_interval: Duration,
    /// Flush threshold of the transaction batcher.
    pub batch_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rebroadcast_budget: 3,
            dedup_cache_size: 100_000,
            batch_interval: Duration::from_millis(500),
            batch_size: 2_000,
        }
    }
}
