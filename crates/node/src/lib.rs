//! Async node components for the payment-channel core.
//!
//! Everything here reconciles locally held off-chain state (channels,
//! tickets, commitment chains) with the authoritative, asynchronously
//! confirmed state of the external chain. The chain itself is reached only
//! through the [`chain::ChainClient`] trait; persistence only through the
//! `KvStore` trait from `tollgate-core`.

pub mod chain;
pub mod commitment;
pub mod config;
pub mod error;
pub mod events;
pub mod indexer;
pub mod nonce;
pub mod redeem;
pub mod resolver;
pub mod store;
pub mod txledger;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(not(feature = "metrics"))]
pub mod metrics_shim;

// When the metrics feature is off, expose a unified `metrics` via the shim.
#[cfg(not(feature = "metrics"))]
pub use self::metrics_shim as metrics;

pub use chain::{ChainClient, ChainNotification, ProviderError, TxPayload};
pub use commitment::{CommitmentManager, CommitmentPublisher, InitOutcome};
pub use config::NodeConfig;
pub use error::NodeError;
pub use events::{ChainEvent, EventSnapshot, Log};
pub use indexer::{ChainIndexer, IndexerEvent, IndexerStatus};
pub use nonce::{NonceLock, NonceTracker};
pub use redeem::{ChannelRedemption, RedemptionScheduler, SweepSummary, TicketOutcome};
pub use resolver::{TxResolution, TxResolver};
pub use store::StateStore;
pub use txledger::{TrackedTransaction, TransactionLedger, TxState};
