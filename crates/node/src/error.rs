//! Node-level error taxonomy.
//!
//! Three families with different handling:
//! - infrastructure-transient: bounded retry / indexer restart;
//! - data corruption: fatal for the affected channel's commitment chain;
//! - concurrency violations: fatal abort, retrying risks a double spend.
//!
//! Definitive protocol rejections are not errors here: they travel as
//! `RejectReason` values inside redemption results.

use thiserror::Error;

use tollgate_core::{ChannelId, CoreError, Hash32, KvError};

use crate::chain::ProviderError;
use crate::txledger::TxLedgerError;

/// `Clone` so results can be fanned out to callers joined on a single-flight
/// redemption.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("kv store: {0}")]
    Kv(#[from] KvError),

    #[error(transparent)]
    Core(CoreError),

    #[error(transparent)]
    TxLedger(#[from] TxLedgerError),

    /// The channel's commitment chain cannot produce the required preimage.
    /// Requires regeneration and republication; unredeemed tickets issued
    /// against the old chain are lost.
    #[error("commitment chain corrupted for channel {0}")]
    CorruptedChain(ChannelId),

    /// The same ticket index was attempted twice in a row: aborting instead
    /// of spinning, since retrying a redemption risks a double spend.
    #[error("redemption stalled on channel {channel} at ticket index {index}")]
    RedemptionStalled { channel: ChannelId, index: u64 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("timed out waiting for transaction {0} to confirm")]
    ResolutionTimeout(Hash32),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
}

impl From<CoreError> for NodeError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::PreImageNotFound(id) => NodeError::CorruptedChain(id),
            CoreError::Kv(kv) => NodeError::Kv(kv),
            other => NodeError::Core(other),
        }
    }
}

impl NodeError {
    /// Whether retrying at a coarser grain (e.g. a full indexer restart)
    /// can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Provider(p) => p.is_transient(),
            NodeError::RetriesExhausted { .. } | NodeError::ResolutionTimeout(_) => true,
            NodeError::Kv(_)
            | NodeError::Core(_)
            | NodeError::TxLedger(_)
            | NodeError::CorruptedChain(_)
            | NodeError::RedemptionStalled { .. }
            | NodeError::UnknownChannel(_) => false,
        }
    }
}
