//! Per-transaction-hash completion handles.
//!
//! Components that submit a transaction register its hash here and await a
//! typed one-shot resolution instead of listening for dynamically named
//! events. The indexer resolves entries when it confirms the corresponding
//! log; a timeout removes the entry so the registry cannot grow without
//! bound.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tollgate_core::Hash32;

use crate::error::NodeError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxResolution {
    /// The transaction's effects were confirmed at this block.
    Confirmed { block: u64 },
    /// The transaction was definitively rejected or reverted.
    Rejected { reason: String },
}

#[derive(Default)]
pub struct TxResolver {
    waiters: Mutex<HashMap<Hash32, oneshot::Sender<TxResolution>>>,
}

impl TxResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `hash`. A second registration for the same hash
    /// replaces the first (whose receiver then resolves as cancelled).
    pub fn register(&self, hash: Hash32) -> oneshot::Receiver<TxResolution> {
        let (tx, rx) = oneshot::channel();
        if self.waiters.lock().insert(hash, tx).is_some() {
            log::warn!("tx resolver: replaced existing waiter for {hash}");
        }
        rx
    }

    /// Resolve a registered hash exactly once. Returns false when nobody is
    /// waiting (already resolved, timed out, or never registered).
    pub fn resolve(&self, hash: &Hash32, resolution: TxResolution) -> bool {
        match self.waiters.lock().remove(hash) {
            Some(tx) => tx.send(resolution).is_ok(),
            None => false,
        }
    }

    pub fn reject(&self, hash: &Hash32, reason: impl Into<String>) -> bool {
        self.resolve(
            hash,
            TxResolution::Rejected {
                reason: reason.into(),
            },
        )
    }

    /// Withdraw a registration whose transaction will never resolve (e.g. a
    /// submission that failed fatally before reaching the chain).
    pub fn cancel(&self, hash: &Hash32) {
        self.waiters.lock().remove(hash);
    }

    /// Wait on a previously registered receiver, bounded by `timeout`. A
    /// resolution that arrived between `register` and this call is already
    /// buffered in the receiver and returned immediately. On timeout the
    /// entry is removed so a late resolution does not accumulate.
    pub async fn wait(
        &self,
        hash: Hash32,
        rx: oneshot::Receiver<TxResolution>,
        timeout: Duration,
    ) -> Result<TxResolution, NodeError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolution)) => Ok(resolution),
            // sender dropped: a replacement registration stole the slot
            Ok(Err(_)) => Err(NodeError::ResolutionTimeout(hash)),
            Err(_) => {
                self.waiters.lock().remove(&hash);
                Err(NodeError::ResolutionTimeout(hash))
            }
        }
    }

    /// Register and wait in one step, bounded by `timeout`.
    pub async fn await_resolution(
        &self,
        hash: Hash32,
        timeout: Duration,
    ) -> Result<TxResolution, NodeError> {
        let rx = self.register(hash);
        self.wait(hash, rx, timeout).await
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}
