//! Confirmation-depth and ordering behavior of the chain indexer.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tollgate_core::{channel_id, ChannelStatus, Hash32, MemoryKv};
use tollgate_node::events::ChainEvent;
use tollgate_node::{
    ChainIndexer, IndexerStatus, NodeConfig, StateStore, TransactionLedger, TxResolver,
};

use support::*;

fn cfg() -> NodeConfig {
    NodeConfig {
        genesis_block: 0,
        max_confirmations: 2,
        restart_backoff: Duration::from_millis(10),
        ..NodeConfig::default()
    }
}

struct Fixture {
    chain: Arc<MockChain>,
    indexer: Arc<ChainIndexer<MockChain>>,
    store: StateStore,
}

fn fixture() -> Fixture {
    init_logs();
    let chain = MockChain::new();
    let store = StateStore::new(Arc::new(MemoryKv::new()));
    let cfg = cfg();
    let ledger = Arc::new(TransactionLedger::new(&cfg));
    let resolver = Arc::new(TxResolver::new());
    let indexer = ChainIndexer::new(
        Arc::clone(&chain),
        store.clone(),
        ledger,
        resolver,
        cfg,
        addr(9),
    );
    Fixture {
        chain,
        indexer,
        store,
    }
}

#[tokio::test]
async fn events_apply_only_past_the_confirmation_depth() {
    let f = fixture();
    let src = addr(1);
    let dst = addr(9);
    let id = channel_id(&src, &dst);

    f.chain.push_log(log_at(
        1,
        0,
        0,
        ChainEvent::ChannelOpened {
            source: src,
            destination: dst,
        },
    ));
    f.indexer.start().await.unwrap();
    assert_eq!(f.indexer.status(), IndexerStatus::Started);
    let mut events = f.indexer.subscribe_events();

    // two confirmations required: at block 2 the event is still buffered
    f.chain.mine_block(1).await;
    f.chain.mine_block(2).await;
    assert!(wait_block_processed(&mut events, 2, Duration::from_secs(2)).await);
    assert!(f.store.channel(&id).unwrap().is_none());

    f.chain.mine_block(3).await;
    assert!(wait_block_processed(&mut events, 3, Duration::from_secs(2)).await);
    let ch = f.store.channel(&id).unwrap().unwrap();
    assert_eq!(ch.status, ChannelStatus::WaitingForCommitment);
    assert_eq!(ch.source, src);

    f.indexer.stop().await;
}

#[tokio::test]
async fn events_in_one_block_apply_in_log_position_order() {
    let f = fixture();
    let src = addr(1);
    let dst = addr(9);
    let id = channel_id(&src, &dst);

    // pushed funded-before-opened: ingestion must reorder by snapshot
    f.chain.push_log(log_at(
        1,
        1,
        0,
        ChainEvent::ChannelFunded {
            channel: id,
            source_amount: 50,
            destination_amount: 0,
        },
    ));
    f.chain.push_log(log_at(
        1,
        0,
        0,
        ChainEvent::ChannelOpened {
            source: src,
            destination: dst,
        },
    ));
    f.chain.push_log(log_at(
        2,
        0,
        0,
        ChainEvent::CommitmentSet {
            channel: id,
            commitment: Hash32([7u8; 32]),
        },
    ));

    f.indexer.start().await.unwrap();
    let mut events = f.indexer.subscribe_events();
    f.chain.mine_block(4).await;
    assert!(wait_block_processed(&mut events, 4, Duration::from_secs(2)).await);

    let ch = f.store.channel(&id).unwrap().unwrap();
    assert_eq!(ch.source_balance, 50);
    assert_eq!(ch.status, ChannelStatus::Open);

    f.indexer.stop().await;
}

#[tokio::test]
async fn reorged_out_events_are_never_applied() {
    let f = fixture();
    let src = addr(1);
    let dst = addr(9);
    let id = channel_id(&src, &dst);
    let opened = || ChainEvent::ChannelOpened {
        source: src,
        destination: dst,
    };

    f.indexer.start().await.unwrap();
    let mut events = f.indexer.subscribe_events();

    // emitted at block 3, discarded by a reorg before two descendants exist
    f.chain.push_log(log_at(3, 0, 0, opened()));
    f.chain.mine_block(3).await;
    f.chain.mine_block(4).await;
    assert!(wait_block_processed(&mut events, 4, Duration::from_secs(2)).await);
    f.chain.remove_log(snap(3, 0, 0));

    f.chain.mine_block(5).await;
    f.chain.mine_block(6).await;
    assert!(wait_block_processed(&mut events, 6, Duration::from_secs(2)).await);
    assert!(f.store.channel(&id).unwrap().is_none());

    // the replacement chain segment re-emits it at a later position; once
    // past the depth it applies exactly once
    f.chain.push_log(log_at(6, 0, 0, opened()));
    f.chain.mine_block(7).await;
    f.chain.mine_block(8).await;
    assert!(wait_block_processed(&mut events, 8, Duration::from_secs(2)).await);
    let ch = f.store.channel(&id).unwrap().unwrap();
    assert_eq!(ch.status, ChannelStatus::WaitingForCommitment);
    assert_eq!(ch.channel_epoch, 1);

    f.indexer.stop().await;
}

#[tokio::test]
async fn restart_replay_does_not_reapply_confirmed_events() {
    let f = fixture();
    let src = addr(1);
    let dst = addr(9);
    let id = channel_id(&src, &dst);

    f.chain.push_log(log_at(
        1,
        0,
        0,
        ChainEvent::ChannelOpened {
            source: src,
            destination: dst,
        },
    ));
    // a duplicate application of this one would fail the strict
    // ticket-index advance, so surviving a restart proves the watermark
    f.chain.push_log(log_at(
        2,
        0,
        0,
        ChainEvent::TicketRedeemed {
            channel: id,
            new_ticket_index: 3,
            amount: 0,
        },
    ));

    f.indexer.start().await.unwrap();
    let mut events = f.indexer.subscribe_events();
    f.chain.mine_block(4).await;
    assert!(wait_block_processed(&mut events, 4, Duration::from_secs(2)).await);
    assert_eq!(f.store.channel(&id).unwrap().unwrap().ticket_index, 3);
    f.indexer.stop().await;

    // restart: the replay window (saved block minus the confirmation depth)
    // re-fetches the already applied logs
    f.indexer.start().await.unwrap();
    assert_eq!(f.indexer.status(), IndexerStatus::Started);
    let mut events = f.indexer.subscribe_events();
    f.chain.mine_block(6).await;
    assert!(wait_block_processed(&mut events, 6, Duration::from_secs(2)).await);
    assert_eq!(f.store.channel(&id).unwrap().unwrap().ticket_index, 3);

    f.indexer.stop().await;
}

#[tokio::test]
async fn replay_survives_transient_log_failures() {
    let f = fixture();
    let src = addr(1);
    let dst = addr(9);
    let id = channel_id(&src, &dst);

    f.chain.push_log(log_at(
        1,
        0,
        0,
        ChainEvent::ChannelOpened {
            source: src,
            destination: dst,
        },
    ));
    f.chain.set_head(4);
    // fewer failures than the per-chunk retry budget
    f.chain.fail_next_logs(2);

    f.indexer.start().await.unwrap();
    assert_eq!(f.indexer.status(), IndexerStatus::Started);
    assert!(f.store.channel(&id).unwrap().is_some());

    f.indexer.stop().await;
}
