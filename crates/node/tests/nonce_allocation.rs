//! Nonce allocation against the three sources: network count, local
//! confirmations, and live pending transactions.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tollgate_core::Address;
use tollgate_node::chain::TxPayload;
use tollgate_node::{NodeConfig, NonceTracker, TransactionLedger};

use support::*;

fn payload(nonce: u64) -> TxPayload {
    TxPayload {
        to: Address([8u8; 20]),
        data: vec![],
        value: 0,
        nonce,
        gas_price: 1,
    }
}

fn tracker(
    chain: &Arc<MockChain>,
    min_pending: Duration,
) -> (Arc<NonceTracker<MockChain>>, Arc<TransactionLedger>) {
    let cfg = NodeConfig {
        min_pending,
        ..NodeConfig::default()
    };
    let ledger = Arc::new(TransactionLedger::new(&cfg));
    let tracker = Arc::new(NonceTracker::new(
        Arc::clone(chain),
        Arc::clone(&ledger),
        &cfg,
    ));
    (tracker, ledger)
}

fn confirm(ledger: &TransactionLedger, sender: Address, nonce: u64) {
    let tx = payload(nonce);
    let hash = tx.hash();
    ledger.add_to_queuing(hash, sender, tx).unwrap();
    ledger.move_to_pending(hash).unwrap();
    ledger.move_to_mined(hash).unwrap();
    ledger.move_to_confirmed(hash).unwrap();
}

fn pend(ledger: &TransactionLedger, sender: Address, nonce: u64) {
    let tx = payload(nonce);
    let hash = tx.hash();
    ledger.add_to_queuing(hash, sender, tx).unwrap();
    ledger.move_to_pending(hash).unwrap();
}

#[tokio::test]
async fn network_count_alone_sets_the_nonce() {
    let chain = MockChain::new();
    let sender = addr(1);
    chain.set_tx_count(sender, 5);
    let (tracker, _) = tracker(&chain, Duration::from_secs(60));

    let lock = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(lock.next_nonce, 5);
    assert_eq!(lock.provenance.network, 5);
}

#[tokio::test]
async fn local_confirmation_ahead_of_the_network_wins() {
    let chain = MockChain::new();
    let sender = addr(1);
    // the network has not caught up with our confirmed nonce 7 yet
    chain.set_tx_count(sender, 5);
    let (tracker, ledger) = tracker(&chain, Duration::from_secs(60));
    confirm(&ledger, sender, 7);

    let lock = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(lock.next_nonce, 8);
    assert_eq!(lock.provenance.highest_confirmed, Some(7));
}

#[tokio::test]
async fn allocation_extends_past_an_unbroken_pending_run() {
    let chain = MockChain::new();
    let sender = addr(1);
    chain.set_tx_count(sender, 5);
    let (tracker, ledger) = tracker(&chain, Duration::from_secs(60));
    pend(&ledger, sender, 5);
    pend(&ledger, sender, 6);
    // a gap: nonce 8 does not extend the run from 5
    pend(&ledger, sender, 8);

    let lock = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(lock.next_nonce, 7);
    assert_eq!(lock.provenance.highest_live_pending, Some(6));
}

#[tokio::test]
async fn stuck_pending_nonces_become_reusable() {
    let chain = MockChain::new();
    let sender = addr(1);
    chain.set_tx_count(sender, 5);
    // zero min_pending: every pending transaction counts as stuck
    let (tracker, ledger) = tracker(&chain, Duration::ZERO);
    pend(&ledger, sender, 5);
    pend(&ledger, sender, 6);

    let lock = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(lock.next_nonce, 5);
    assert_eq!(lock.provenance.highest_live_pending, None);
}

#[tokio::test]
async fn one_lock_per_address_at_a_time() {
    let chain = MockChain::new();
    let sender = addr(1);
    let (tracker, _) = tracker(&chain, Duration::from_secs(60));

    let first = tracker.nonce_lock(sender).await.unwrap();

    let t2 = Arc::clone(&tracker);
    let second = tokio::spawn(async move { t2.nonce_lock(sender).await });
    // the second allocation queues behind the held lock
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    drop(first);
    let second = second.await.unwrap().unwrap();
    // the first allocation consumed nonce 0 even though nothing was sent
    assert_eq!(second.next_nonce, 1);
}

#[tokio::test]
async fn sequential_allocations_are_gap_free() {
    let chain = MockChain::new();
    let sender = addr(1);
    let (tracker, _) = tracker(&chain, Duration::from_secs(60));

    // nothing on the network, nothing confirmed, nothing submitted: the
    // allocation mark alone must keep the sequence moving
    let mut got = Vec::new();
    for _ in 0..3 {
        let lock = tracker.nonce_lock(sender).await.unwrap();
        got.push(lock.next_nonce);
    }
    assert_eq!(got, vec![0, 1, 2]);
}

#[tokio::test]
async fn a_stuck_transaction_frees_its_allocated_nonce() {
    let chain = MockChain::new();
    let sender = addr(1);
    // zero min_pending: every pending transaction counts as stuck
    let (tracker, ledger) = tracker(&chain, Duration::ZERO);

    let first = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(first.next_nonce, 0);
    drop(first);
    pend(&ledger, sender, 0);

    // the abandoned slot pulls the allocation mark back down
    let second = tracker.nonce_lock(sender).await.unwrap();
    assert_eq!(second.next_nonce, 0);
}

#[tokio::test]
async fn different_addresses_do_not_contend() {
    let chain = MockChain::new();
    let (tracker, _) = tracker(&chain, Duration::from_secs(60));

    let a = tracker.nonce_lock(addr(1)).await.unwrap();
    // holding the lock on one address must not block another
    let b = tokio::time::timeout(Duration::from_secs(1), tracker.nonce_lock(addr(2)))
        .await
        .expect("second address blocked on the first address's lock")
        .unwrap();
    assert_eq!(a.next_nonce, 0);
    assert_eq!(b.next_nonce, 0);
}
