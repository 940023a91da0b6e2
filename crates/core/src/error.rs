use thiserror::Error;

use crate::types::ChannelId;

/// Errors surfaced by the synchronous domain logic.
///
/// `Clone` is intentional: redemption results are fanned out to every caller
/// joined on a single-flight operation, so errors must be cheaply copyable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("kv store: {0}")]
    Kv(#[from] crate::kv::KvError),

    #[error("codec: {0}")]
    Codec(String),

    /// The preimage of the current chain step is not reachable from any
    /// stored checkpoint. Fatal for this channel's chain; the only recovery
    /// is regenerating and republishing a fresh chain.
    #[error("pre-image not found for channel {0}: commitment chain is corrupted or exhausted")]
    PreImageNotFound(ChannelId),

    #[error("commitment chain for channel {0} is not initialized")]
    ChainNotInitialized(ChannelId),

    #[error("ticket index regression: current {current}, proposed {proposed}")]
    TicketIndexRegression { current: u64, proposed: u64 },

    #[error("invalid channel status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::channel::ChannelStatus,
        to: crate::channel::ChannelStatus,
    },
}

impl From<Box<bincode::ErrorKind>> for CoreError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CoreError::Codec(e.to_string())
    }
}
