//! Per-address nonce allocation.
//!
//! The next safe nonce combines the remote transaction count at the latest
//! block, the highest locally confirmed nonce plus one, and the per-address
//! mark of nonces already handed out, then extends past every live locally
//! pending nonce in an unbroken run. The allocation mark is what keeps
//! sequential allocations gap-free and repeat-free even when the network
//! count lags and nothing was submitted.
//!
//! Pending transactions older than `min_pending` are treated as stuck and
//! excluded from the continuity scan; a stuck nonce also pulls the
//! allocation mark back down, so its slot becomes reusable.
//!
//! Locking discipline: one async mutex per address, handed to the caller
//! inside the returned [`NonceLock`] as an owned guard, so release happens
//! on every code path by construction. A process-wide gate mutex must be
//! briefly free before any per-address lock is taken, which lets global
//! operations (an indexer restart) hold the gate and drain allocations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tollgate_core::Address;

use crate::chain::ChainClient;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::txledger::TransactionLedger;

/// Where the allocated nonce came from, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonceProvenance {
    pub network: u64,
    pub highest_confirmed: Option<u64>,
    pub highest_live_pending: Option<u64>,
}

/// An allocated nonce plus the held per-address lock.
///
/// Dropping the lock releases the address for the next allocation; holding
/// it across the send keeps nonce allocation ordered by lock acquisition.
pub struct NonceLock {
    pub next_nonce: u64,
    pub provenance: NonceProvenance,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for NonceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLock")
            .field("next_nonce", &self.next_nonce)
            .field("provenance", &self.provenance)
            .finish()
    }
}

pub struct NonceTracker<C> {
    chain: Arc<C>,
    ledger: Arc<TransactionLedger>,
    locks: SyncMutex<HashMap<Address, Arc<Mutex<()>>>>,
    gate: Arc<Mutex<()>>,
    /// Next unallocated nonce per address, bumped under the held address
    /// lock on every allocation.
    allocated: SyncMutex<HashMap<Address, u64>>,
    min_pending: Duration,
}

impl<C: ChainClient> NonceTracker<C> {
    pub fn new(chain: Arc<C>, ledger: Arc<TransactionLedger>, cfg: &NodeConfig) -> Self {
        Self {
            chain,
            ledger,
            locks: SyncMutex::new(HashMap::new()),
            gate: Arc::new(Mutex::new(())),
            allocated: SyncMutex::new(HashMap::new()),
            min_pending: cfg.min_pending,
        }
    }

    /// Hold the process-wide gate. While the returned guard lives, no new
    /// per-address allocation can begin.
    pub async fn hold_gate(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.gate).lock_owned().await
    }

    fn address_lock(&self, address: Address) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Allocate the next usable nonce for `address`, returning the held
    /// per-address lock. At most one `NonceLock` per address exists at a
    /// time; concurrent callers queue on the address mutex.
    pub async fn nonce_lock(&self, address: Address) -> Result<NonceLock, NodeError> {
        // the gate must be momentarily free before touching the address lock
        drop(self.gate.lock().await);

        let guard = self.address_lock(address).lock_owned().await;

        let latest = self.chain.latest_block_number().await?;
        let network = self.chain.transaction_count(address, latest).await?;
        let highest_confirmed = self.ledger.highest_confirmed_nonce(&address);

        let mut next = network.max(
            highest_confirmed
                .map(|n| n.saturating_add(1))
                .unwrap_or(0),
        );

        // previously handed-out nonces count as taken even when nothing was
        // submitted against them, except where a stuck pending transaction
        // frees its slot again
        let stuck = self.ledger.stuck_pending_nonces(&address, self.min_pending);
        let mark = {
            let allocated = self.allocated.lock();
            let mark = allocated.get(&address).copied().unwrap_or(0);
            match stuck.iter().find(|n| **n >= next) {
                Some(reusable) => mark.min(*reusable),
                None => mark,
            }
        };
        next = next.max(mark);

        // extend past the unbroken run of live pending nonces
        let live = self.ledger.live_pending_nonces(&address, self.min_pending);
        let mut highest_live_pending = None;
        for nonce in &live {
            if *nonce == next {
                highest_live_pending = Some(*nonce);
                next += 1;
            } else if *nonce > next {
                // gap: nonces beyond it are not blocking
                break;
            }
        }

        self.allocated
            .lock()
            .insert(address, next.saturating_add(1));

        crate::metrics::nonce_locks_issued_inc();
        log::debug!(
            "nonce lock for {address}: next={next} network={network} confirmed={highest_confirmed:?} pending={highest_live_pending:?}"
        );

        Ok(NonceLock {
            next_nonce: next,
            provenance: NonceProvenance {
                network,
                highest_confirmed,
                highest_live_pending,
            },
            _guard: guard,
        })
    }
}
