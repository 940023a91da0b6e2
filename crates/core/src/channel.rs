//! Payment channel state.
//!
//! A channel is a bilateral escrow between `source` (the paying party) and
//! `destination` (the receiving party). Its local view is derived exclusively
//! from confirmed chain events; the invariants here guard against replaying
//! stale or out-of-order events into it:
//!
//! - `ticket_index` only increases,
//! - status transitions are monotone, except `Closed -> WaitingForCommitment`
//!   on reopen (which bumps `channel_epoch` and resets the ticket index),
//! - `commitment` changes only through an explicit commitment-set event.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{channel_id, Address, Balance, ChannelId, Hash32};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Closed,
    WaitingForCommitment,
    Open,
    PendingToClose,
}

impl ChannelStatus {
    /// Monotone ordering of the status machine within one epoch.
    fn rank(self) -> u8 {
        match self {
            ChannelStatus::Closed => 0,
            ChannelStatus::WaitingForCommitment => 1,
            ChannelStatus::Open => 2,
            ChannelStatus::PendingToClose => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub source: Address,
    pub destination: Address,
    pub source_balance: Balance,
    pub destination_balance: Balance,
    /// Replay counter: the next redeemable ticket carries this index.
    pub ticket_index: u64,
    /// Incremented every time a closed channel is reopened.
    pub channel_epoch: u64,
    /// Head of the destination's current commitment hash-chain, as published
    /// on chain. Zero until the first commitment-set event confirms.
    pub commitment: Hash32,
    pub status: ChannelStatus,
}

impl Channel {
    pub fn new(source: Address, destination: Address) -> Self {
        Channel {
            id: channel_id(&source, &destination),
            source,
            destination,
            source_balance: 0,
            destination_balance: 0,
            ticket_index: 0,
            channel_epoch: 1,
            commitment: Hash32::ZERO,
            status: ChannelStatus::WaitingForCommitment,
        }
    }

    pub fn total_balance(&self) -> Balance {
        self.source_balance.saturating_add(self.destination_balance)
    }

    /// Transition the status. Forward-only within an epoch; the only allowed
    /// back-transition is handled by [`Channel::reopen`].
    pub fn transition(&mut self, to: ChannelStatus) -> Result<(), CoreError> {
        if to.rank() > self.status.rank()
            || (self.status == ChannelStatus::PendingToClose && to == ChannelStatus::Closed)
        {
            self.status = to;
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// Advance the replay counter. Rejects any non-increasing index.
    pub fn advance_ticket_index(&mut self, proposed: u64) -> Result<(), CoreError> {
        if proposed <= self.ticket_index {
            return Err(CoreError::TicketIndexRegression {
                current: self.ticket_index,
                proposed,
            });
        }
        self.ticket_index = proposed;
        Ok(())
    }

    /// Record a newly published commitment for the destination's chain.
    pub fn set_commitment(&mut self, commitment: Hash32) {
        self.commitment = commitment;
        if self.status == ChannelStatus::WaitingForCommitment {
            self.status = ChannelStatus::Open;
        }
    }

    /// Reopen a closed channel: new epoch, fresh ticket counter, balances and
    /// commitment reset until the corresponding events confirm.
    pub fn reopen(&mut self) -> Result<(), CoreError> {
        if self.status != ChannelStatus::Closed {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: ChannelStatus::WaitingForCommitment,
            });
        }
        self.channel_epoch += 1;
        self.ticket_index = 0;
        self.source_balance = 0;
        self.destination_balance = 0;
        self.commitment = Hash32::ZERO;
        self.status = ChannelStatus::WaitingForCommitment;
        Ok(())
    }
}
