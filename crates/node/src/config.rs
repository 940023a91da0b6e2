use std::time::Duration;

/// Tunables for the indexer, nonce tracker, and redemption scheduler.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// First block the contracts can have emitted events at.
    pub genesis_block: u64,
    /// Descendant blocks required before an event is treated as final.
    pub max_confirmations: u64,
    /// Initial block-range width for historical log fetches.
    pub log_chunk_size: u64,
    /// Fetch attempts per chunk before the replay fails fatally.
    pub chunk_retry_budget: u32,
    /// Base delay between indexer restart attempts (doubled per attempt).
    pub restart_backoff: Duration,
    /// Restart attempts before the indexer stays stopped.
    pub max_restart_attempts: u32,
    /// Age past which a locally pending transaction is treated as stuck and
    /// its nonce becomes reusable.
    pub min_pending: Duration,
    /// Confirmed ledger entries retained per address (highest nonces kept).
    pub confirmed_retention: usize,
    /// How long a redemption waits for its transaction to confirm.
    pub redemption_timeout: Duration,
    /// Refresh the node's own native balance each time a block becomes final.
    pub reconcile_native_balance: bool,
    /// Gas price attached to outgoing transactions.
    pub gas_price: u128,
    /// Worst-case gas per transaction, used to gate queued resubmission on
    /// available balance.
    pub gas_limit: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            genesis_block: 0,
            max_confirmations: 8,
            log_chunk_size: 2_000,
            chunk_retry_budget: 3,
            restart_backoff: Duration::from_millis(500),
            max_restart_attempts: 5,
            min_pending: Duration::from_secs(90),
            confirmed_retention: 5,
            redemption_timeout: Duration::from_secs(60),
            reconcile_native_balance: false,
            gas_price: 1_000_000_000,
            gas_limit: 200_000,
        }
    }
}
