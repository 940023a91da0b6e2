//! Chain client capability trait.
//!
//! The production implementation (RPC transport, contract ABI encoding, log
//! filter construction, wallet signing) lives outside this workspace. Node
//! components are generic over this trait; tests drive them with an
//! in-process double.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

use tollgate_core::{Address, Balance, Hash32};

use crate::events::Log;

/// Provider failures, pre-classified by the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Transient connectivity failures warrant a restart plus resubmission
    /// of queued transactions; unknown failures restart without assuming
    /// anything about what was delivered.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::ConnectionReset(_) | ProviderError::Timeout(_)
        )
    }
}

/// Signed-transaction payload handed to the provider.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxPayload {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: Balance,
    pub nonce: u64,
    pub gas_price: u128,
}

impl TxPayload {
    /// Deterministic local hash of the signed payload, known before
    /// submission so the ledger can track a transaction that never reached
    /// the provider.
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(20 + self.data.len() + 16 + 8 + 16);
        buf.extend_from_slice(self.to.as_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.value.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.gas_price.to_be_bytes());
        tollgate_core::hash::keccak256(&buf)
    }

    /// Worst-case native cost of landing this transaction.
    pub fn max_cost(&self, gas_limit: u64) -> Balance {
        self.gas_price
            .saturating_mul(gas_limit as u128)
            .saturating_add(self.value)
    }
}

/// Pushed to subscribers for every new chain head, or when the provider's
/// own subscription fails.
#[derive(Clone, Debug)]
pub enum ChainNotification {
    Block(u64),
    ProviderError(ProviderError),
}

/// External chain access consumed by the node components.
pub trait ChainClient: Send + Sync + 'static {
    fn latest_block_number(&self) -> impl Future<Output = Result<u64, ProviderError>> + Send;

    /// Decoded logs emitted in the inclusive block range.
    fn logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, ProviderError>> + Send;

    /// Number of transactions sent from `address` up to `block`.
    fn transaction_count(
        &self,
        address: Address,
        block: u64,
    ) -> impl Future<Output = Result<u64, ProviderError>> + Send;

    fn send_signed_transaction(
        &self,
        payload: TxPayload,
    ) -> impl Future<Output = Result<Hash32, ProviderError>> + Send;

    fn native_balance(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Balance, ProviderError>> + Send;

    fn token_balance(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Balance, ProviderError>> + Send;

    /// New-block and provider-error notifications. Each call returns an
    /// independent subscription.
    fn subscribe(&self) -> mpsc::Receiver<ChainNotification>;
}
