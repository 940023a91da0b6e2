//! In-process doubles and builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use tollgate_core::{
    keccak256, AcknowledgedTicket, Address, Balance, ChannelId, Hash32, Ticket, WIN_PROB_ALWAYS,
};
use tollgate_node::chain::{ChainClient, ChainNotification, ProviderError, TxPayload};
use tollgate_node::commitment::CommitmentPublisher;
use tollgate_node::events::{ChainEvent, EventSnapshot, Log};
use tollgate_node::indexer::IndexerEvent;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(n: u8) -> Address {
    Address([n; 20])
}

pub fn snap(block: u64, tx: u64, log: u64) -> EventSnapshot {
    EventSnapshot {
        block_number: block,
        tx_index: tx,
        log_index: log,
    }
}

pub fn log_at(block: u64, tx: u64, log_index: u64, event: ChainEvent) -> Log {
    let tx_hash = keccak256(&[
        block.to_be_bytes().as_slice(),
        tx.to_be_bytes().as_slice(),
        log_index.to_be_bytes().as_slice(),
    ]
    .concat());
    Log {
        snapshot: snap(block, tx, log_index),
        tx_hash,
        event,
    }
}

pub fn log_with_tx(block: u64, tx: u64, log_index: u64, tx_hash: Hash32, event: ChainEvent) -> Log {
    Log {
        snapshot: snap(block, tx, log_index),
        tx_hash,
        event,
    }
}

/// An always-winning acknowledged ticket whose challenge is solved by its
/// own response.
pub fn winning_ack(epoch: u64, index: u64, amount: Balance, destination: Address) -> AcknowledgedTicket {
    let response = keccak256(format!("response-{epoch}-{index}").as_bytes());
    let ticket = Ticket {
        counterparty: destination,
        challenge: keccak256(response.as_bytes()),
        amount,
        win_prob: WIN_PROB_ALWAYS,
        channel_epoch: epoch,
        index,
        signature: [0u8; 64],
    };
    AcknowledgedTicket::new(ticket, response)
}

#[derive(Default)]
struct ChainInner {
    head: u64,
    logs: Vec<Log>,
    tx_counts: HashMap<Address, u64>,
    balances: HashMap<Address, Balance>,
    log_failures: u32,
    send_failures: u32,
    sent: Vec<TxPayload>,
}

/// Scriptable in-process chain provider.
#[derive(Default)]
pub struct MockChain {
    inner: Mutex<ChainInner>,
    subscribers: Mutex<Vec<mpsc::Sender<ChainNotification>>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_head(&self, head: u64) {
        self.inner.lock().head = head;
    }

    pub fn push_log(&self, log: Log) {
        self.inner.lock().logs.push(log);
    }

    /// Drop a previously pushed log, as a reorg discarding its block would.
    pub fn remove_log(&self, snapshot: EventSnapshot) {
        self.inner.lock().logs.retain(|l| l.snapshot != snapshot);
    }

    pub fn set_tx_count(&self, address: Address, count: u64) {
        self.inner.lock().tx_counts.insert(address, count);
    }

    pub fn set_balance(&self, address: Address, balance: Balance) {
        self.inner.lock().balances.insert(address, balance);
    }

    /// Fail the next `n` log fetches with a timeout.
    pub fn fail_next_logs(&self, n: u32) {
        self.inner.lock().log_failures = n;
    }

    /// Fail the next `n` sends with a connection reset.
    pub fn fail_next_sends(&self, n: u32) {
        self.inner.lock().send_failures = n;
    }

    pub fn sent(&self) -> Vec<TxPayload> {
        self.inner.lock().sent.clone()
    }

    /// Advance the head and notify every subscriber.
    pub async fn mine_block(&self, block: u64) {
        self.inner.lock().head = block;
        let senders = self.subscribers.lock().clone();
        for sender in senders {
            let _ = sender.send(ChainNotification::Block(block)).await;
        }
    }

    pub async fn emit_provider_error(&self, error: ProviderError) {
        let senders = self.subscribers.lock().clone();
        for sender in senders {
            let _ = sender
                .send(ChainNotification::ProviderError(error.clone()))
                .await;
        }
    }
}

impl ChainClient for MockChain {
    fn latest_block_number(&self) -> impl std::future::Future<Output = Result<u64, ProviderError>> + Send {
        let res = Ok(self.inner.lock().head);
        async move { res }
    }

    fn logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> impl std::future::Future<Output = Result<Vec<Log>, ProviderError>> + Send {
        let res = {
            let mut inner = self.inner.lock();
            if inner.log_failures > 0 {
                inner.log_failures -= 1;
                Err(ProviderError::Timeout(format!(
                    "logs {from_block}..={to_block}"
                )))
            } else {
                Ok(inner
                    .logs
                    .iter()
                    .filter(|l| (from_block..=to_block).contains(&l.block_number()))
                    .cloned()
                    .collect())
            }
        };
        async move { res }
    }

    fn transaction_count(
        &self,
        address: Address,
        _block: u64,
    ) -> impl std::future::Future<Output = Result<u64, ProviderError>> + Send {
        let res = Ok(self.inner.lock().tx_counts.get(&address).copied().unwrap_or(0));
        async move { res }
    }

    fn send_signed_transaction(
        &self,
        payload: TxPayload,
    ) -> impl std::future::Future<Output = Result<Hash32, ProviderError>> + Send {
        let res = {
            let mut inner = self.inner.lock();
            if inner.send_failures > 0 {
                inner.send_failures -= 1;
                Err(ProviderError::ConnectionReset("send".into()))
            } else {
                let hash = payload.hash();
                inner.sent.push(payload);
                Ok(hash)
            }
        };
        async move { res }
    }

    fn native_balance(
        &self,
        address: Address,
    ) -> impl std::future::Future<Output = Result<Balance, ProviderError>> + Send {
        let res = Ok(self
            .inner
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(u128::MAX / 2));
        async move { res }
    }

    fn token_balance(
        &self,
        address: Address,
    ) -> impl std::future::Future<Output = Result<Balance, ProviderError>> + Send {
        let res = Ok(self
            .inner
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(0));
        async move { res }
    }

    fn subscribe(&self) -> mpsc::Receiver<ChainNotification> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Publisher that records every published commitment and returns a
/// deterministic transaction hash.
#[derive(Default)]
pub struct MockPublisher {
    published: Mutex<Vec<(ChannelId, Hash32)>>,
}

impl MockPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<(ChannelId, Hash32)> {
        self.published.lock().clone()
    }
}

impl CommitmentPublisher for MockPublisher {
    fn publish(
        &self,
        channel: ChannelId,
        commitment: Hash32,
    ) -> impl std::future::Future<Output = Result<Hash32, ProviderError>> + Send {
        self.published.lock().push((channel, commitment));
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(channel.as_bytes());
        buf.extend_from_slice(commitment.as_bytes());
        let res = Ok(keccak256(&buf));
        async move { res }
    }
}

/// Confirm every transaction the mock provider accepts, as soon as someone
/// awaits its resolution. Abort the returned handle when done.
pub fn auto_confirm(
    chain: Arc<MockChain>,
    resolver: Arc<tollgate_node::TxResolver>,
) -> tokio::task::JoinHandle<()> {
    use tollgate_node::TxResolution;
    tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            let sent = chain.sent();
            for payload in &sent[seen..] {
                let hash = payload.hash();
                while !resolver.resolve(&hash, TxResolution::Confirmed { block: 1 }) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            seen = sent.len();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait for a `BlockProcessed(block)` on the indexer event stream.
pub async fn wait_block_processed(
    rx: &mut broadcast::Receiver<IndexerEvent>,
    block: u64,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(IndexerEvent::BlockProcessed(b))) if b >= block => return true,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return false,
        }
    }
}
