//! Keccak-256 helpers.
//!
//! The digest choice mirrors the on-chain contract: both the commitment chain
//! and the ticket luck computation must hash bit-for-bit the way the ledger
//! does, or locally-winning tickets would be rejected on redemption.

use sha3::{Digest, Keccak256};

use crate::types::Hash32;

#[inline]
pub fn keccak256(msg: &[u8]) -> Hash32 {
    let mut h = Keccak256::new();
    h.update(msg);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Hash32(arr)
}

/// One forward step of a commitment chain.
#[inline]
pub fn chain_step(value: &Hash32) -> Hash32 {
    keccak256(value.as_bytes())
}

/// Apply the chain hash `n` times to `seed`.
pub fn iterate(seed: &Hash32, n: u64) -> Hash32 {
    let mut v = *seed;
    for _ in 0..n {
        v = chain_step(&v);
    }
    v
}
