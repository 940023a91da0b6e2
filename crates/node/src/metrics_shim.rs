//! No-op stand-ins for the `metrics` feature, so call sites stay
//! unconditional.

#[inline]
pub fn blocks_processed_inc() {}

#[inline]
pub fn latest_block_set(_block: u64) {}

#[inline]
pub fn events_applied_inc() {}

#[inline]
pub fn unconfirmed_queue_set(_len: usize) {}

#[inline]
pub fn indexer_restarts_inc() {}

#[inline]
pub fn tickets_redeemed_inc() {}

#[inline]
pub fn tickets_rejected_inc() {}

#[inline]
pub fn nonce_locks_issued_inc() {}
