//! Byte-key schema for the key-value store.
//!
//! All persisted entries live in one keyspace, namespaced by short prefixes.
//! Numeric key components are big-endian so lexicographic iteration matches
//! numeric order.

use crate::types::{Address, ChannelId};

const PREFIX_META_LATEST_BLOCK: &[u8] = b"meta:latest_block";
const PREFIX_META_SNAPSHOT: &[u8] = b"meta:confirmed_snapshot";
const PREFIX_CHANNEL: &[u8] = b"channel:";
const PREFIX_ACCOUNT: &[u8] = b"account:";
const PREFIX_COMMITMENT: &[u8] = b"commitment:";
const PREFIX_COMMITMENT_CURRENT: &[u8] = b"commitment-current:";
const PREFIX_TICKET: &[u8] = b"ticket:";

/// Watermark: highest fully processed block number.
pub fn latest_block() -> Vec<u8> {
    PREFIX_META_LATEST_BLOCK.to_vec()
}

/// Watermark: ordering snapshot of the last applied event.
pub fn confirmed_snapshot() -> Vec<u8> {
    PREFIX_META_SNAPSHOT.to_vec()
}

pub fn channel(id: &ChannelId) -> Vec<u8> {
    let mut k = PREFIX_CHANNEL.to_vec();
    k.extend_from_slice(id.as_bytes());
    k
}

pub fn channel_prefix() -> Vec<u8> {
    PREFIX_CHANNEL.to_vec()
}

pub fn account(addr: &Address) -> Vec<u8> {
    let mut k = PREFIX_ACCOUNT.to_vec();
    k.extend_from_slice(addr.as_bytes());
    k
}

/// Commitment-chain checkpoint for one channel at a fixed iteration.
pub fn commitment_checkpoint(id: &ChannelId, iteration: u64) -> Vec<u8> {
    let mut k = PREFIX_COMMITMENT.to_vec();
    k.extend_from_slice(id.as_bytes());
    k.push(b':');
    k.extend_from_slice(&iteration.to_be_bytes());
    k
}

pub fn commitment_checkpoint_prefix(id: &ChannelId) -> Vec<u8> {
    let mut k = PREFIX_COMMITMENT.to_vec();
    k.extend_from_slice(id.as_bytes());
    k.push(b':');
    k
}

/// The chain step matching the last published on-chain commitment.
pub fn commitment_current(id: &ChannelId) -> Vec<u8> {
    let mut k = PREFIX_COMMITMENT_CURRENT.to_vec();
    k.extend_from_slice(id.as_bytes());
    k
}

/// Acknowledged-ticket queue entry. Index is big-endian so prefix iteration
/// yields tickets in ascending ticket-index order.
pub fn ticket(id: &ChannelId, index: u64) -> Vec<u8> {
    let mut k = PREFIX_TICKET.to_vec();
    k.extend_from_slice(id.as_bytes());
    k.push(b':');
    k.extend_from_slice(&index.to_be_bytes());
    k
}

pub fn ticket_prefix(id: &ChannelId) -> Vec<u8> {
    let mut k = PREFIX_TICKET.to_vec();
    k.extend_from_slice(id.as_bytes());
    k.push(b':');
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_keys_sort_by_index() {
        let id = ChannelId::from_bytes([3u8; 32]);
        let a = ticket(&id, 1);
        let b = ticket(&id, 2);
        let c = ticket(&id, 256);
        assert!(a < b);
        assert!(b < c);
        assert!(a.starts_with(&ticket_prefix(&id)));
    }

    #[test]
    fn checkpoint_keys_are_per_channel() {
        let a = ChannelId::from_bytes([1u8; 32]);
        let b = ChannelId::from_bytes([2u8; 32]);
        assert_ne!(commitment_checkpoint(&a, 0), commitment_checkpoint(&b, 0));
    }
}
