//! Persistent channel/account state over the key-value contract.
//!
//! Writes happen only inside the indexer's block-processing critical section
//! or a single-flight redemption for one channel, so the store itself needs
//! no locking beyond what the backing `KvStore` provides.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tollgate_core::keys;
use tollgate_core::kv::{get_typed, put_typed, KvStore, WriteBatch};
use tollgate_core::{
    channel_id, AcknowledgedTicket, Address, Balance, Channel, ChannelId, ChannelStatus,
};

use crate::error::NodeError;
use crate::events::{ChainEvent, EventSnapshot};

/// Per-address view kept for balance gating and announcements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub address: Address,
    pub native_balance: Balance,
    pub multiaddr: Option<String>,
}

/// Handle over the node's persistent tables.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    // ------------------------------------------------------------------
    // Watermarks
    // ------------------------------------------------------------------

    pub fn latest_block(&self) -> Result<Option<u64>, NodeError> {
        Ok(get_typed(self.kv.as_ref(), &keys::latest_block())?)
    }

    pub fn set_latest_block(&self, block: u64) -> Result<(), NodeError> {
        put_typed(self.kv.as_ref(), &keys::latest_block(), &block)?;
        Ok(())
    }

    pub fn confirmed_snapshot(&self) -> Result<Option<EventSnapshot>, NodeError> {
        Ok(get_typed(self.kv.as_ref(), &keys::confirmed_snapshot())?)
    }

    // ------------------------------------------------------------------
    // Channels and accounts
    // ------------------------------------------------------------------

    pub fn channel(&self, id: &ChannelId) -> Result<Option<Channel>, NodeError> {
        Ok(get_typed(self.kv.as_ref(), &keys::channel(id))?)
    }

    pub fn put_channel(&self, channel: &Channel) -> Result<(), NodeError> {
        put_typed(self.kv.as_ref(), &keys::channel(&channel.id), channel)?;
        Ok(())
    }

    /// All known channels, in ascending channel-id order.
    pub fn channels(&self) -> Result<Vec<Channel>, NodeError> {
        let entries = self.kv.iter_prefix(&keys::channel_prefix())?;
        let mut out = Vec::with_capacity(entries.len());
        for (_, bytes) in entries {
            let ch: Channel = bincode::deserialize(&bytes)
                .map_err(|e| tollgate_core::KvError::Codec(e.to_string()))?;
            out.push(ch);
        }
        Ok(out)
    }

    /// Channels that pay into `destination` and could hold redeemable
    /// tickets.
    pub fn incoming_channels(&self, destination: &Address) -> Result<Vec<Channel>, NodeError> {
        Ok(self
            .channels()?
            .into_iter()
            .filter(|ch| ch.destination == *destination && ch.status != ChannelStatus::Closed)
            .collect())
    }

    pub fn account(&self, addr: &Address) -> Result<Option<AccountEntry>, NodeError> {
        Ok(get_typed(self.kv.as_ref(), &keys::account(addr))?)
    }

    pub fn put_account(&self, entry: &AccountEntry) -> Result<(), NodeError> {
        put_typed(self.kv.as_ref(), &keys::account(&entry.address), entry)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Acknowledged-ticket queue
    // ------------------------------------------------------------------

    pub fn push_ticket(&self, channel: &ChannelId, ack: &AcknowledgedTicket) -> Result<(), NodeError> {
        put_typed(
            self.kv.as_ref(),
            &keys::ticket(channel, ack.ticket.index),
            ack,
        )?;
        Ok(())
    }

    /// The unredeemed ticket with the lowest index for this channel.
    pub fn oldest_unredeemed(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<AcknowledgedTicket>, NodeError> {
        let entries = self.kv.iter_prefix(&keys::ticket_prefix(channel))?;
        match entries.into_iter().next() {
            None => Ok(None),
            Some((_, bytes)) => {
                let ack: AcknowledgedTicket = bincode::deserialize(&bytes)
                    .map_err(|e| tollgate_core::KvError::Codec(e.to_string()))?;
                Ok(Some(ack))
            }
        }
    }

    pub fn mark_redeemed(&self, channel: &ChannelId, index: u64) -> Result<(), NodeError> {
        self.kv.delete(&keys::ticket(channel, index))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Confirmed-event application
    // ------------------------------------------------------------------

    /// Apply one confirmed event and atomically advance the snapshot
    /// watermark. Returns the updated channel, if the event touched one, for
    /// emission to subscribers.
    ///
    /// Stale or duplicate events must be filtered by the caller before this
    /// point; the watermark written here is what makes that filter correct
    /// across restarts.
    pub fn apply_event(
        &self,
        snapshot: EventSnapshot,
        event: &ChainEvent,
    ) -> Result<Option<Channel>, NodeError> {
        let updated = match event {
            ChainEvent::ChannelOpened {
                source,
                destination,
            } => {
                let id = channel_id(source, destination);
                let channel = match self.channel(&id)? {
                    Some(mut existing) if existing.status == ChannelStatus::Closed => {
                        existing.reopen()?;
                        // funding direction can flip on reopen
                        existing.source = *source;
                        existing.destination = *destination;
                        existing
                    }
                    Some(existing) => {
                        log::debug!("channel {id}: duplicate open event ignored");
                        existing
                    }
                    None => Channel::new(*source, *destination),
                };
                Some(channel)
            }
            ChainEvent::ChannelFunded {
                channel,
                source_amount,
                destination_amount,
            } => {
                let mut ch = self
                    .channel(channel)?
                    .ok_or(NodeError::UnknownChannel(*channel))?;
                ch.source_balance = ch.source_balance.saturating_add(*source_amount);
                ch.destination_balance =
                    ch.destination_balance.saturating_add(*destination_amount);
                Some(ch)
            }
            ChainEvent::CommitmentSet {
                channel,
                commitment,
            } => {
                let mut ch = self
                    .channel(channel)?
                    .ok_or(NodeError::UnknownChannel(*channel))?;
                ch.set_commitment(*commitment);
                Some(ch)
            }
            ChainEvent::TicketRedeemed {
                channel,
                new_ticket_index,
                amount,
            } => {
                let mut ch = self
                    .channel(channel)?
                    .ok_or(NodeError::UnknownChannel(*channel))?;
                ch.advance_ticket_index(*new_ticket_index)?;
                ch.source_balance = ch.source_balance.saturating_sub(*amount);
                ch.destination_balance = ch.destination_balance.saturating_add(*amount);
                Some(ch)
            }
            ChainEvent::ClosureInitiated { channel } => {
                let mut ch = self
                    .channel(channel)?
                    .ok_or(NodeError::UnknownChannel(*channel))?;
                ch.transition(ChannelStatus::PendingToClose)?;
                Some(ch)
            }
            ChainEvent::ChannelClosed { channel } => {
                let mut ch = self
                    .channel(channel)?
                    .ok_or(NodeError::UnknownChannel(*channel))?;
                ch.transition(ChannelStatus::Closed)?;
                Some(ch)
            }
            ChainEvent::Announcement { peer, multiaddr } => {
                let mut entry = self.account(peer)?.unwrap_or(AccountEntry {
                    address: *peer,
                    ..AccountEntry::default()
                });
                entry.multiaddr = Some(multiaddr.clone());
                self.put_account(&entry)?;
                None
            }
        };

        // the state mutation and the watermark advance land in one batch, so
        // a crash cannot persist one without the other
        let mut batch = WriteBatch::new();
        if let Some(ch) = &updated {
            batch.put_typed(keys::channel(&ch.id), ch)?;
        }
        batch.put_typed(keys::confirmed_snapshot(), &snapshot)?;
        self.kv.write_batch(batch)?;
        Ok(updated)
    }
}
