//! Mining configuration.

use std::time::Duration;

/// Policy for the proof-state membership check applied to inbound proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatePolicy {
    /// Accept every proof-state list without inspection.
    #[default]
    Permissive,
    /// Reject a proof whose state list claims a root for us that is not in
    /// our recent history.
    Strict,
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Minimum seconds' worth of wall time between local rounds.
    pub block_period: Duration,
    /// Upper bound on transactions drained into one round.
    pub block_max_txs: usize,
    /// Pending-count trigger for starting a round before the period
    /// elapses.
    pub min_txs_to_mine: usize,
    /// Minimum tip age for the early-start trigger.
    pub early_round_delta: Duration,
    /// How long an emitted proof waits for its quorum.
    pub wait_confirm_timeout: Duration,
    /// Sweep interval for timed-out unconfirmed proofs.
    pub unconfirmed_check_interval: Duration,
    /// Number of mining peers the quorum is derived from.
    pub miner_number: usize,
    /// Explicit quorum override; `None` derives `miner_number / 2`
    /// (majority minus self).
    pub confirm_threshold: Option<usize>,
    /// Proof-state membership policy.
    pub state_policy: StatePolicy,
    /// Round-check ticker interval.
    pub round_tick: Duration,
    /// Commit writer ticker interval.
    pub commit_tick: Duration,
    /// Per-tick budget of the commit writer.
    pub commit_budget: Duration,
    /// Confirm-count batcher interval.
    pub confirm_update_interval: Duration,
    /// Upper bound of confirm-count entries consumed per pass.
    pub confirm_update_batch: usize,
}

impl MinerConfig {
    /// Quorum of distinct peer confirms required to accept a local round.
    pub fn threshold(&self) -> usize {
        self.confirm_threshold
            .unwrap_or(self.miner_number / 2)
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            block_period: Duration::from_secs(2),
            block_max_txs: 50_000,
            min_txs_to_mine: 100_000,
            early_round_delta: Duration::from_millis(20),
            wait_confirm_timeout: Duration::from_secs(30),
            unconfirmed_check_interval: Duration::from_secs(5),
            miner_number: 8,
            confirm_threshold: None,
            state_policy: StatePolicy::Permissive,
            round_tick: Duration::from_millis(10),
            commit_tick: Duration::from_millis(500),
            commit_budget: Duration::from_secs(2),
            confirm_update_interval: Duration::from_secs(1),
            confirm_update_batch: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_threshold_is_majority_minus_self() {
        let config = MinerConfig::default();
        assert_eq!(config.miner_number, 8);
        assert_eq!(config.threshold(), 4);
    }

    #[test]
    fn explicit_threshold_wins() {
        let config = MinerConfig {
            confirm_threshold: Some(1),
            ..Default::default()
        };
        assert_eq!(config.threshold(), 1);
    }
}
