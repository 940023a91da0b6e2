//! Chain indexer.
//!
//! Subscribes to new blocks, buffers decoded logs until they survive the
//! configured confirmation depth, and applies them to persistent state
//! exactly once, in `(block, tx index, log index)` order. In steady state
//! logs are fetched only once their block has survived the confirmation
//! depth, so an event reorged out before becoming confirmable is never
//! fetched at all; one re-emitted with an equal-or-later position is ordered
//! by its snapshot key, and the persisted watermark filters anything already
//! applied (the startup replay refetches a full depth's worth of history).
//!
//! Status machine: `Stopped -> Starting -> Started -> (Restarting ->
//! Starting) | Stopped`. Restarts are single-flight and reentrant-safe; a
//! concurrent restart request while one is in progress is a no-op.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use tollgate_core::{Address, Channel};

use crate::chain::{ChainClient, ChainNotification};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{EventSnapshot, Log};
use crate::metrics;
use crate::resolver::{TxResolution, TxResolver};
use crate::store::StateStore;
use crate::txledger::{TransactionLedger, TxState};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexerStatus {
    Stopped,
    Starting,
    Started,
    Restarting,
}

#[derive(Clone, Debug)]
pub enum IndexerEvent {
    Status(IndexerStatus),
    /// A raw new-block notification, emitted before any processing.
    Block(u64),
    /// The block's logs were fetched, confirmable events drained, and the
    /// watermark persisted.
    BlockProcessed(u64),
    ChannelUpdated(Channel),
    Announcement { peer: Address, multiaddr: String },
}

/// Mutable indexing state owned by the processing task.
struct IndexerState {
    /// Next block whose logs have not been fetched yet.
    next_fetch: u64,
    /// Highest chain head seen.
    latest_block: u64,
    /// Watermark of the last applied event.
    last_applied: Option<EventSnapshot>,
    /// Events below the confirmation depth, in snapshot order.
    unconfirmed: VecDeque<Log>,
}

pub struct ChainIndexer<C> {
    chain: Arc<C>,
    store: StateStore,
    ledger: Arc<TransactionLedger>,
    resolver: Arc<TxResolver>,
    cfg: NodeConfig,
    self_address: Address,
    status: RwLock<IndexerStatus>,
    events_tx: broadcast::Sender<IndexerEvent>,
    stop: AtomicBool,
    restarting: AtomicBool,
    /// Block-processing critical section. Held for the whole of one block's
    /// processing; `stop()` and restart teardown wait on it via the task
    /// join, so no half-applied block is ever left behind.
    processing: Mutex<()>,
    shutdown: Notify,
    join: SyncMutex<Option<JoinHandle<()>>>,
    /// Back-reference for spawning owned tasks from `&self` methods.
    weak: Weak<Self>,
}

impl<C: ChainClient> ChainIndexer<C> {
    pub fn new(
        chain: Arc<C>,
        store: StateStore,
        ledger: Arc<TransactionLedger>,
        resolver: Arc<TxResolver>,
        cfg: NodeConfig,
        self_address: Address,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new_cyclic(|weak| Self {
            chain,
            store,
            ledger,
            resolver,
            cfg,
            self_address,
            status: RwLock::new(IndexerStatus::Stopped),
            events_tx,
            stop: AtomicBool::new(false),
            restarting: AtomicBool::new(false),
            processing: Mutex::new(()),
            shutdown: Notify::new(),
            join: SyncMutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn status(&self) -> IndexerStatus {
        *self.status.read()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<IndexerEvent> {
        self.events_tx.subscribe()
    }

    fn set_status(&self, status: IndexerStatus) {
        *self.status.write() = status;
        log::info!("indexer: status {status:?}");
        let _ = self.events_tx.send(IndexerEvent::Status(status));
    }

    fn emit(&self, event: IndexerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Start indexing: replay the reorg-safe historical window, then follow
    /// new-block notifications. No-op when already starting or started.
    pub async fn start(&self) -> Result<(), NodeError> {
        {
            let status = self.status();
            if matches!(status, IndexerStatus::Starting | IndexerStatus::Started) {
                return Ok(());
            }
        }
        self.set_status(IndexerStatus::Starting);
        self.stop.store(false, Ordering::SeqCst);
        match self.start_inner().await {
            Ok(()) => {
                self.set_status(IndexerStatus::Started);
                Ok(())
            }
            Err(e) => {
                // do not leave the status stuck at Starting, or later start
                // calls would no-op against a dead indexer
                self.set_status(IndexerStatus::Stopped);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), NodeError> {
        // a crash inside the reorg window must not skip events, so replay
        // starts a full confirmation depth behind the saved watermark
        let last_saved = self.store.latest_block()?.unwrap_or(self.cfg.genesis_block);
        let replay_from = self
            .cfg
            .genesis_block
            .max(last_saved.saturating_sub(self.cfg.max_confirmations));
        let mut state = IndexerState {
            next_fetch: replay_from,
            latest_block: last_saved,
            last_applied: self.store.confirmed_snapshot()?,
            unconfirmed: VecDeque::new(),
        };

        let head = self.chain.latest_block_number().await?;
        log::info!(
            "indexer: replaying logs from block {replay_from} to head {head} \
             (saved watermark {last_saved})"
        );
        if head >= replay_from {
            let logs = self.fetch_range(replay_from, head).await?;
            self.ingest(&mut state, logs);
            state.next_fetch = head + 1;
        }
        state.latest_block = state.latest_block.max(head);
        self.drain_confirmed(&mut state, head)?;
        self.store.set_latest_block(head)?;

        let rx = self.chain.subscribe();
        let Some(this) = self.weak.upgrade() else {
            return Ok(());
        };
        let handle = tokio::spawn(async move { this.run_loop(state, rx).await });
        *self.join.lock() = Some(handle);
        Ok(())
    }

    /// Stop indexing. Waits for any in-flight block-processing critical
    /// section to finish before declaring the indexer stopped.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // notify_one stores a permit when the loop is mid-block rather than
        // parked, so the wakeup cannot be lost
        self.shutdown.notify_one();
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.set_status(IndexerStatus::Stopped);
    }

    async fn run_loop(self: Arc<Self>, mut state: IndexerState, mut rx: mpsc::Receiver<ChainNotification>) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.shutdown.notified() => {
                    // a stale permit from a previous stop cycle wakes the
                    // select without meaning this run should end
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
                note = rx.recv() => match note {
                    None => {
                        log::warn!("indexer: provider subscription closed");
                        self.spawn_restart(true);
                        return;
                    }
                    Some(ChainNotification::ProviderError(e)) => {
                        let transient = e.is_transient();
                        log::warn!("indexer: provider error ({e}), transient={transient}");
                        self.spawn_restart(transient);
                        return;
                    }
                    Some(ChainNotification::Block(block)) => {
                        let _cs = self.processing.lock().await;
                        if self.stop.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = self.process_block(&mut state, block).await {
                            log::error!("indexer: failed to process block {block}: {e}");
                            self.spawn_restart(e.is_transient());
                            return;
                        }
                    }
                },
            }
        }
    }

    /// One block's critical section: fetch logs up to the confirmable edge,
    /// buffer them, drain whatever crossed the confirmation depth, persist
    /// the watermark.
    async fn process_block(&self, state: &mut IndexerState, block: u64) -> Result<(), NodeError> {
        self.emit(IndexerEvent::Block(block));
        state.latest_block = state.latest_block.max(block);
        metrics::latest_block_set(state.latest_block);

        // fetch only up to the confirmable edge: a log reorged out while its
        // block was still below the depth is never seen here
        let edge = block.saturating_sub(self.cfg.max_confirmations);
        if edge >= state.next_fetch {
            let logs = self.fetch_range(state.next_fetch, edge).await?;
            self.ingest(state, logs);
            state.next_fetch = edge + 1;
        }

        if self.cfg.reconcile_native_balance && block >= self.cfg.max_confirmations {
            self.reconcile_balance().await?;
        }

        self.drain_confirmed(state, block)?;
        self.store.set_latest_block(block)?;
        metrics::blocks_processed_inc();
        self.emit(IndexerEvent::BlockProcessed(block));

        self.resend_queued().await?;
        Ok(())
    }

    /// Fetch logs for an inclusive range in bounded chunks, shrinking the
    /// chunk geometrically on provider failure and giving up after the
    /// per-chunk retry budget.
    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<Log>, NodeError> {
        let mut out = Vec::new();
        let mut next = from;
        let mut chunk = self.cfg.log_chunk_size.max(1);
        let mut attempts: u32 = 0;
        while next <= to {
            let end = to.min(next.saturating_add(chunk - 1));
            match self.chain.logs(next, end).await {
                Ok(logs) => {
                    out.extend(logs);
                    next = end + 1;
                    attempts = 0;
                    // keep the reactor responsive during long replays
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.cfg.chunk_retry_budget {
                        return Err(NodeError::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    chunk = (chunk / 2).max(1);
                    log::warn!(
                        "indexer: log fetch {next}..={end} failed ({e}), \
                         retry {attempts} with chunk {chunk}"
                    );
                    sleep(Duration::from_millis(100 * attempts as u64)).await;
                }
            }
        }
        Ok(out)
    }

    /// Buffer freshly fetched logs, dropping anything at or before the
    /// applied watermark and keeping the queue in snapshot order.
    fn ingest(&self, state: &mut IndexerState, logs: Vec<Log>) {
        for log in logs {
            if let Some(last) = state.last_applied {
                if log.snapshot <= last {
                    continue;
                }
            }
            if state
                .unconfirmed
                .iter()
                .any(|queued| queued.snapshot == log.snapshot)
            {
                continue;
            }
            // our own transaction surfacing in a block is now mined
            if self.ledger.state_of(&log.tx_hash) == Some(TxState::Pending) {
                let _ = self.ledger.move_to_mined(log.tx_hash);
            }
            state.unconfirmed.push_back(log);
        }
        state
            .unconfirmed
            .make_contiguous()
            .sort_by_key(|l| l.snapshot);
        metrics::unconfirmed_queue_set(state.unconfirmed.len());
    }

    /// Apply every buffered event that crossed the confirmation depth, in
    /// snapshot order, exactly once.
    fn drain_confirmed(&self, state: &mut IndexerState, current: u64) -> Result<(), NodeError> {
        while let Some(front) = state.unconfirmed.front() {
            if front.block_number() + self.cfg.max_confirmations > current {
                break;
            }
            let Some(log) = state.unconfirmed.pop_front() else {
                break;
            };
            if let Some(last) = state.last_applied {
                if log.snapshot <= last {
                    continue;
                }
            }

            let updated = self.store.apply_event(log.snapshot, &log.event)?;
            state.last_applied = Some(log.snapshot);
            metrics::events_applied_inc();

            if self.ledger.state_of(&log.tx_hash).is_some() {
                let _ = self.ledger.move_to_confirmed(log.tx_hash);
            }
            self.resolver.resolve(
                &log.tx_hash,
                TxResolution::Confirmed {
                    block: log.block_number(),
                },
            );

            if let crate::events::ChainEvent::Announcement { peer, multiaddr } = &log.event {
                self.emit(IndexerEvent::Announcement {
                    peer: *peer,
                    multiaddr: multiaddr.clone(),
                });
            }
            if let Some(channel) = updated {
                self.emit(IndexerEvent::ChannelUpdated(channel));
            }
        }
        metrics::unconfirmed_queue_set(state.unconfirmed.len());
        Ok(())
    }

    /// Refresh the node's own native balance from the chain.
    async fn reconcile_balance(&self) -> Result<(), NodeError> {
        let balance = self.chain.native_balance(self.self_address).await?;
        let mut entry = self
            .store
            .account(&self.self_address)?
            .unwrap_or(crate::store::AccountEntry {
                address: self.self_address,
                ..Default::default()
            });
        if entry.native_balance != balance {
            entry.native_balance = balance;
            self.store.put_account(&entry)?;
        }
        Ok(())
    }

    /// Resubmit queued-but-unsent transactions once the account balance
    /// covers their worst-case cost.
    async fn resend_queued(&self) -> Result<(), NodeError> {
        let queued = self.ledger.queued();
        if queued.is_empty() {
            return Ok(());
        }
        let mut balance = self.chain.native_balance(self.self_address).await?;
        for tx in queued {
            let cost = tx.payload.max_cost(self.cfg.gas_limit);
            if balance < cost {
                log::debug!(
                    "indexer: balance {balance} cannot cover queued tx {} (cost {cost})",
                    tx.hash
                );
                break;
            }
            match self.chain.send_signed_transaction(tx.payload.clone()).await {
                Ok(_) => {
                    let _ = self.ledger.move_to_pending(tx.hash);
                    balance = balance.saturating_sub(cost);
                    log::info!("indexer: resubmitted queued tx {}", tx.hash);
                }
                Err(e) if e.is_transient() => {
                    log::warn!("indexer: resubmission of {} failed ({e}), keeping queued", tx.hash);
                    break;
                }
                Err(e) => {
                    log::warn!("indexer: resubmission of {} rejected ({e}), dropping", tx.hash);
                    self.ledger.remove(&tx.hash);
                }
            }
        }
        Ok(())
    }

    /// Trigger a single-flight restart. A concurrent request while one is
    /// in progress is a no-op.
    fn spawn_restart(&self, resubmit_queued: bool) {
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        if self.restarting.swap(true, Ordering::SeqCst) {
            return;
        }
        metrics::indexer_restarts_inc();
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.restart_with_backoff(resubmit_queued).await;
            this.restarting.store(false, Ordering::SeqCst);
        });
    }

    async fn restart_with_backoff(&self, resubmit_queued: bool) {
        self.set_status(IndexerStatus::Restarting);

        // wait out the previous run loop (and its critical section)
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut backoff = self.cfg.restart_backoff;
        for attempt in 1..=self.cfg.max_restart_attempts {
            sleep(backoff).await;
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            match self.start().await {
                Ok(()) => {
                    log::info!("indexer: restarted on attempt {attempt}");
                    if resubmit_queued {
                        if let Err(e) = self.resend_queued().await {
                            log::warn!("indexer: post-restart resubmission failed: {e}");
                        }
                    }
                    return;
                }
                Err(e) => {
                    log::warn!("indexer: restart attempt {attempt} failed: {e}");
                    self.set_status(IndexerStatus::Restarting);
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
        log::error!(
            "indexer: giving up after {} restart attempts",
            self.cfg.max_restart_attempts
        );
        self.set_status(IndexerStatus::Stopped);
    }
}
