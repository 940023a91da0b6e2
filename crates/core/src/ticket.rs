//! Probabilistic payment tickets.
//!
//! A ticket is a signed promise of `amount` that pays out only if a
//! hash-based lottery condition holds. The winning probability is encoded as
//! a 256-bit big-endian fraction of the digest space: a ticket wins when its
//! luck value, itself a 32-byte digest, is not greater than `win_prob`.

use serde::{Deserialize, Serialize};

use crate::hash::keccak256;
use crate::types::{Address, Balance, Hash32};

/// Probability 1: every luck value wins.
pub const WIN_PROB_ALWAYS: [u8; 32] = [0xff; 32];
/// Probability 0: no luck value wins.
pub const WIN_PROB_NEVER: [u8; 32] = [0x00; 32];

/// Encode a probability in `[0, 1]` as a 256-bit big-endian fraction.
///
/// The encoding is the integer part of `p * 2^256`, clamped to the digest
/// space; `1.0` maps to all-0xFF and `0.0` to all-0x00.
pub fn win_prob_from_fraction(p: f64) -> [u8; 32] {
    if p >= 1.0 {
        return WIN_PROB_ALWAYS;
    }
    if p <= 0.0 {
        return WIN_PROB_NEVER;
    }
    let mut out = [0u8; 32];
    let mut frac = p;
    for byte in out.iter_mut() {
        frac *= 256.0;
        let digit = frac.floor();
        *byte = digit as u8;
        frac -= digit;
    }
    out
}

/// A signed, probabilistic promise of payment.
///
/// The signature is opaque here: key handling and signature verification
/// belong to the wallet layer, which checks it before a ticket is ever
/// acknowledged locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// The party this ticket pays (the channel destination).
    pub counterparty: Address,
    /// Hash commitment to the challenge secret: `keccak256(response)`.
    pub challenge: Hash32,
    pub amount: Balance,
    /// 256-bit big-endian winning-probability bound.
    pub win_prob: [u8; 32],
    /// Epoch of the channel this ticket was issued against.
    pub channel_epoch: u64,
    /// Position in the channel's strictly increasing redemption order.
    pub index: u64,
    #[serde(with = "serde_sig")]
    pub signature: [u8; 64],
}

impl Ticket {
    /// Digest committed to by the issuer's signature and used as the luck
    /// input. Field order is fixed; changing it breaks redemption on chain.
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(20 + 32 + 16 + 32 + 8 + 8);
        buf.extend_from_slice(self.counterparty.as_bytes());
        buf.extend_from_slice(self.challenge.as_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(&self.win_prob);
        buf.extend_from_slice(&self.channel_epoch.to_be_bytes());
        buf.extend_from_slice(&self.index.to_be_bytes());
        keccak256(&buf)
    }
}

/// A ticket whose challenge has been solved by the receiving side.
///
/// `pre_image` stays zero until validation copies in the chain step consumed
/// to prove the win; a validated ticket therefore pins the exact preimage it
/// was redeemed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgedTicket {
    pub ticket: Ticket,
    /// The solved challenge secret: `keccak256(response) == ticket.challenge`.
    pub response: Hash32,
    pub pre_image: Hash32,
}

impl AcknowledgedTicket {
    pub fn new(ticket: Ticket, response: Hash32) -> Self {
        AcknowledgedTicket {
            ticket,
            response,
            pre_image: Hash32::ZERO,
        }
    }
}

/// Serde adapter for the 64-byte opaque signature (bincode has no native
/// support for arrays past 32 entries on older derive versions).
mod serde_sig {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        sig.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(d)?;
        let mut out = [0u8; 64];
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("signature must be 64 bytes"));
        }
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}
