//! Prometheus metrics for the indexer and redemption pipeline.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, IntCounter, IntGauge,
};

lazy_static! {
    pub static ref BLOCKS_PROCESSED_TOTAL: IntCounter = register_int_counter!(
        "tollgate_blocks_processed_total",
        "Blocks fully processed by the chain indexer"
    )
    .unwrap();
    pub static ref LATEST_BLOCK: IntGauge = register_int_gauge!(
        "tollgate_latest_block",
        "Highest chain head seen by the indexer"
    )
    .unwrap();
    pub static ref EVENTS_APPLIED_TOTAL: IntCounter = register_int_counter!(
        "tollgate_events_applied_total",
        "Confirmed chain events applied to local state"
    )
    .unwrap();
    pub static ref UNCONFIRMED_QUEUE_LEN: IntGauge = register_int_gauge!(
        "tollgate_unconfirmed_queue_len",
        "Events buffered below the confirmation depth"
    )
    .unwrap();
    pub static ref INDEXER_RESTARTS_TOTAL: IntCounter = register_int_counter!(
        "tollgate_indexer_restarts_total",
        "Indexer restarts triggered by provider failures"
    )
    .unwrap();
    pub static ref TICKETS_REDEEMED_TOTAL: IntCounter = register_int_counter!(
        "tollgate_tickets_redeemed_total",
        "Tickets redeemed on chain"
    )
    .unwrap();
    pub static ref TICKETS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        "tollgate_tickets_rejected_total",
        "Tickets rejected as definitively invalid or losing"
    )
    .unwrap();
    pub static ref NONCE_LOCKS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "tollgate_nonce_locks_issued_total",
        "Nonce locks handed out across all addresses"
    )
    .unwrap();
}

#[inline]
pub fn blocks_processed_inc() {
    BLOCKS_PROCESSED_TOTAL.inc();
}

#[inline]
pub fn latest_block_set(block: u64) {
    LATEST_BLOCK.set(block as i64);
}

#[inline]
pub fn events_applied_inc() {
    EVENTS_APPLIED_TOTAL.inc();
}

#[inline]
pub fn unconfirmed_queue_set(len: usize) {
    UNCONFIRMED_QUEUE_LEN.set(len as i64);
}

#[inline]
pub fn indexer_restarts_inc() {
    INDEXER_RESTARTS_TOTAL.inc();
}

#[inline]
pub fn tickets_redeemed_inc() {
    TICKETS_REDEEMED_TOTAL.inc();
}

#[inline]
pub fn tickets_rejected_inc() {
    TICKETS_REJECTED_TOTAL.inc();
}

#[inline]
pub fn nonce_locks_issued_inc() {
    NONCE_LOCKS_ISSUED_TOTAL.inc();
}
