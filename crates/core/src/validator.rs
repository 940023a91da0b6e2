//! Ticket win and validity checks.
//!
//! `is_winning` mirrors the on-chain lottery check bit-for-bit: the luck
//! value is `keccak256(ticket_hash ‖ preimage ‖ response)` and the ticket
//! wins when that value, read as a big-endian 256-bit integer, is at most
//! the ticket's encoded winning probability. The probability bound itself is
//! *not* part of the digest; it participates only as the comparison limit.

use thiserror::Error;

use crate::hash::keccak256;
use crate::ticket::{AcknowledgedTicket, WIN_PROB_NEVER};
use crate::types::Hash32;

/// Definitive (non-retryable) reasons a ticket cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("ticket carries no pre-image")]
    EmptyPreImage,
    #[error("response does not solve the ticket challenge")]
    ChallengeMismatch,
    #[error("ticket is not a win")]
    NotWinning,
    #[error("ticket was issued for a different channel epoch")]
    WrongEpoch,
}

/// The luck value the contract computes for a redemption attempt.
pub fn luck(ticket_hash: &Hash32, pre_image: &Hash32, response: &Hash32) -> Hash32 {
    let mut buf = [0u8; 96];
    buf[..32].copy_from_slice(ticket_hash.as_bytes());
    buf[32..64].copy_from_slice(pre_image.as_bytes());
    buf[64..].copy_from_slice(response.as_bytes());
    keccak256(&buf)
}

/// Whether a redemption attempt wins.
///
/// All-0xFF encodes probability 1 and wins for every input; all-0x00
/// encodes probability 0 and never wins (checked explicitly so the zero
/// bound cannot be satisfied even by an all-zero luck value).
pub fn is_winning(
    ticket_hash: &Hash32,
    response: &Hash32,
    pre_image: &Hash32,
    win_prob: &[u8; 32],
) -> bool {
    if *win_prob == WIN_PROB_NEVER {
        return false;
    }
    luck(ticket_hash, pre_image, response).as_bytes() <= win_prob
}

/// Full validity check for an acknowledged ticket against its assigned
/// preimage. Epoch agreement is checked by the caller, which holds the
/// channel; everything checkable from the ticket alone lives here.
///
/// This function is pure: consuming the commitment-chain step on success is
/// the caller's responsibility, so that a failed submission does not burn a
/// preimage.
pub fn check_acknowledged_ticket(ack: &AcknowledgedTicket) -> Result<(), RejectReason> {
    if ack.pre_image.is_zero() {
        return Err(RejectReason::EmptyPreImage);
    }
    if keccak256(ack.response.as_bytes()) != ack.ticket.challenge {
        return Err(RejectReason::ChallengeMismatch);
    }
    if !is_winning(
        &ack.ticket.hash(),
        &ack.response,
        &ack.pre_image,
        &ack.ticket.win_prob,
    ) {
        return Err(RejectReason::NotWinning);
    }
    Ok(())
}
