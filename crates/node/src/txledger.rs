//! Transaction lifecycle ledger.
//!
//! Tracks every locally built transaction through
//! `Queuing -> Pending -> Mined -> Confirmed`. Transitions are strictly
//! forward; a reverted or superseded transaction is removed outright, since
//! nonce computation only ever needs presence, not history. Confirmed
//! entries are pruned down to the highest few nonces per address to bound
//! memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;

use tollgate_core::{Address, Hash32};

use crate::chain::TxPayload;
use crate::config::NodeConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxLedgerError {
    #[error("transaction {0} is not tracked")]
    NotFound(Hash32),
    #[error("transaction {hash}: cannot move {from:?} -> {to:?}")]
    BackTransition {
        hash: Hash32,
        from: TxState,
        to: TxState,
    },
    #[error("transaction {0} is already tracked")]
    Duplicate(Hash32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Built and signed, but not (successfully) handed to the provider yet.
    Queuing,
    /// Accepted by the provider, waiting for inclusion.
    Pending,
    /// Seen in a block that is not yet past the confirmation depth.
    Mined,
    Confirmed,
}

impl TxState {
    fn rank(self) -> u8 {
        match self {
            TxState::Queuing => 0,
            TxState::Pending => 1,
            TxState::Mined => 2,
            TxState::Confirmed => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackedTransaction {
    pub hash: Hash32,
    pub sender: Address,
    pub nonce: u64,
    pub payload: TxPayload,
    pub created_at: Instant,
    pub state: TxState,
}

/// Shared, synchronous ledger. Short critical sections only.
pub struct TransactionLedger {
    inner: RwLock<HashMap<Hash32, TrackedTransaction>>,
    retention: usize,
}

impl TransactionLedger {
    pub fn new(cfg: &NodeConfig) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            retention: cfg.confirmed_retention,
        }
    }

    pub fn add_to_queuing(
        &self,
        hash: Hash32,
        sender: Address,
        payload: TxPayload,
    ) -> Result<(), TxLedgerError> {
        let mut inner = self.inner.write();
        if inner.contains_key(&hash) {
            return Err(TxLedgerError::Duplicate(hash));
        }
        inner.insert(
            hash,
            TrackedTransaction {
                hash,
                sender,
                nonce: payload.nonce,
                payload,
                created_at: Instant::now(),
                state: TxState::Queuing,
            },
        );
        Ok(())
    }

    fn advance(&self, hash: Hash32, to: TxState) -> Result<(), TxLedgerError> {
        let mut inner = self.inner.write();
        let entry = inner.get_mut(&hash).ok_or(TxLedgerError::NotFound(hash))?;
        if to.rank() <= entry.state.rank() {
            return Err(TxLedgerError::BackTransition {
                hash,
                from: entry.state,
                to,
            });
        }
        entry.state = to;
        let sender = entry.sender;
        drop(inner);
        if to == TxState::Confirmed {
            self.prune(sender);
        }
        Ok(())
    }

    pub fn move_to_pending(&self, hash: Hash32) -> Result<(), TxLedgerError> {
        self.advance(hash, TxState::Pending)
    }

    pub fn move_to_mined(&self, hash: Hash32) -> Result<(), TxLedgerError> {
        self.advance(hash, TxState::Mined)
    }

    pub fn move_to_confirmed(&self, hash: Hash32) -> Result<(), TxLedgerError> {
        self.advance(hash, TxState::Confirmed)
    }

    /// Remove a reverted or superseded transaction outright.
    pub fn remove(&self, hash: &Hash32) -> Option<TrackedTransaction> {
        self.inner.write().remove(hash)
    }

    pub fn get(&self, hash: &Hash32) -> Option<TrackedTransaction> {
        self.inner.read().get(hash).cloned()
    }

    pub fn state_of(&self, hash: &Hash32) -> Option<TxState> {
        self.inner.read().get(hash).map(|t| t.state)
    }

    /// All queued-but-unsent transactions, oldest first, across addresses.
    pub fn queued(&self) -> Vec<TrackedTransaction> {
        let mut out: Vec<_> = self
            .inner
            .read()
            .values()
            .filter(|t| t.state == TxState::Queuing)
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.sender, t.nonce));
        out
    }

    /// Highest nonce among this address's confirmed transactions.
    pub fn highest_confirmed_nonce(&self, sender: &Address) -> Option<u64> {
        self.inner
            .read()
            .values()
            .filter(|t| t.sender == *sender && t.state == TxState::Confirmed)
            .map(|t| t.nonce)
            .max()
    }

    /// Nonces of pending (and still-queued) transactions younger than
    /// `min_pending`. Older ones are treated as stuck: their nonces are
    /// deliberately left out so one abandoned transaction cannot block the
    /// address forever.
    pub fn live_pending_nonces(&self, sender: &Address, min_pending: Duration) -> Vec<u64> {
        let now = Instant::now();
        let mut nonces: Vec<u64> = self
            .inner
            .read()
            .values()
            .filter(|t| {
                t.sender == *sender
                    && matches!(t.state, TxState::Queuing | TxState::Pending | TxState::Mined)
                    && now.duration_since(t.created_at) < min_pending
            })
            .map(|t| t.nonce)
            .collect();
        nonces.sort_unstable();
        nonces
    }

    /// Nonces of unconfirmed transactions at least `min_pending` old: the
    /// complement of [`Self::live_pending_nonces`]. Their slots are
    /// considered abandoned and safe to reallocate.
    pub fn stuck_pending_nonces(&self, sender: &Address, min_pending: Duration) -> Vec<u64> {
        let now = Instant::now();
        let mut nonces: Vec<u64> = self
            .inner
            .read()
            .values()
            .filter(|t| {
                t.sender == *sender
                    && matches!(t.state, TxState::Queuing | TxState::Pending | TxState::Mined)
                    && now.duration_since(t.created_at) >= min_pending
            })
            .map(|t| t.nonce)
            .collect();
        nonces.sort_unstable();
        nonces
    }

    /// Drop confirmed entries beyond the `retention` highest nonces for this
    /// address.
    pub fn prune(&self, sender: Address) {
        let mut inner = self.inner.write();
        let mut confirmed: Vec<(Hash32, u64)> = inner
            .values()
            .filter(|t| t.sender == sender && t.state == TxState::Confirmed)
            .map(|t| (t.hash, t.nonce))
            .collect();
        if confirmed.len() <= self.retention {
            return;
        }
        // keep the highest nonces
        confirmed.sort_by_key(|&(_, nonce)| std::cmp::Reverse(nonce));
        for (hash, _) in confirmed.split_off(self.retention) {
            inner.remove(&hash);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
