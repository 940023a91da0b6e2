//! Canonical primitive types shared across the workspace.
//!
//! An address is exactly 20 bytes, a hash is exactly 32 bytes; both are stored
//! raw and hex-encoded only at display boundaries. A channel is identified by
//! the digest of its unordered party pair, so both parties derive the same id
//! regardless of which side computes it.

use serde::{Deserialize, Serialize};

use crate::hash::keccak256;

/// Smallest-unit token amount.
pub type Balance = u128;

/// 20-byte account address.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub [u8; 20]);

impl Address {
    #[inline]
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Address(b)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl AsRef<[u8]> for Address {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 32-byte digest. Used for commitments, preimages, channel ids, and
/// transaction hashes alike.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    #[inline]
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Hash32(b)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl AsRef<[u8]> for Hash32 {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Channel identifier: digest of the unordered party pair.
pub type ChannelId = Hash32;

/// Derive the channel id for a pair of parties. Symmetric in its arguments.
pub fn channel_id(a: &Address, b: &Address) -> ChannelId {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    let mut buf = [0u8; 40];
    buf[..20].copy_from_slice(&lo.0);
    buf[20..].copy_from_slice(&hi.0);
    keccak256(&buf)
}
