//! Typed chain events and their total order.
//!
//! The transport decodes raw contract logs into [`ChainEvent`] before they
//! reach the indexer; the binary log layout stays outside this workspace.
//! Every event carries its [`EventSnapshot`] position, the total-order key
//! `(block number, transaction index, log index)` that makes confirmation
//! draining deterministic and reorg-tolerant.

use serde::{Deserialize, Serialize};

use tollgate_core::{Address, Balance, ChannelId, Hash32};

/// Total-order key of a chain event. Derives `Ord` lexicographically, which
/// is exactly the required `(block, tx, log)` ascending order.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventSnapshot {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

impl std::fmt::Display for EventSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.block_number, self.tx_index, self.log_index
        )
    }
}

/// A decoded contract event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// A channel funded from `source` towards `destination` was opened (or
    /// reopened, if the channel previously closed).
    ChannelOpened {
        source: Address,
        destination: Address,
    },
    /// Escrow added to an existing channel.
    ChannelFunded {
        channel: ChannelId,
        source_amount: Balance,
        destination_amount: Balance,
    },
    /// The destination published the head of its commitment chain.
    CommitmentSet {
        channel: ChannelId,
        commitment: Hash32,
    },
    /// A ticket was redeemed on chain, moving `amount` to the destination
    /// and advancing the replay counter.
    TicketRedeemed {
        channel: ChannelId,
        new_ticket_index: u64,
        amount: Balance,
    },
    ClosureInitiated { channel: ChannelId },
    ChannelClosed { channel: ChannelId },
    /// A peer announced its off-chain transport address.
    Announcement { peer: Address, multiaddr: String },
}

/// A decoded log with its position and originating transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub snapshot: EventSnapshot,
    pub tx_hash: Hash32,
    pub event: ChainEvent,
}

impl Log {
    pub fn block_number(&self) -> u64 {
        self.snapshot.block_number
    }
}
