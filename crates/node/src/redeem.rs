//! Ticket redemption scheduling.
//!
//! Redemptions for one channel are single-flight: the first caller drains
//! the channel's acknowledged-ticket queue in strict index order while every
//! concurrent caller for the same channel joins the in-flight run and
//! receives its result. Submitting two redemptions for one channel
//! concurrently would race on the on-chain ticket index and the commitment
//! preimage, so the serialization here is correctness, not politeness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::oneshot;

use tollgate_core::{
    check_acknowledged_ticket, AcknowledgedTicket, Address, Balance, Channel, ChannelId, Hash32,
    RejectReason,
};

use crate::chain::{ChainClient, TxPayload};
use crate::commitment::{CommitmentManager, CommitmentPublisher};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics;
use crate::nonce::NonceTracker;
use crate::resolver::{TxResolution, TxResolver};
use crate::store::StateStore;
use crate::txledger::TransactionLedger;

/// What happened to a single ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketOutcome {
    Redeemed { amount: Balance, tx: Hash32 },
    /// Definitively invalid or losing. The ticket stays at the front of the
    /// queue and the drain stops: later tickets depend on the on-chain index
    /// this one would have advanced, so skipping past it is not safe.
    Rejected(RejectReason),
}

/// Result of draining one channel's ticket queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelRedemption {
    pub channel: ChannelId,
    pub redeemed: u64,
    pub rejected: u64,
    pub total_amount: Balance,
    /// Why the drain stopped early, if it did. The rejected ticket is still
    /// queued; clearing it is an operator decision, not ours.
    pub rejection: Option<RejectReason>,
}

/// Result of a sweep across all incoming channels.
#[derive(Debug, Default)]
pub struct SweepSummary {
    /// True when another sweep was already running and this call did nothing.
    pub skipped: bool,
    pub redemptions: Vec<ChannelRedemption>,
    pub failures: Vec<(ChannelId, NodeError)>,
}

type JoinWaiters = Vec<oneshot::Sender<Result<ChannelRedemption, NodeError>>>;

pub struct RedemptionScheduler<C, P> {
    chain: Arc<C>,
    store: StateStore,
    commitments: Arc<CommitmentManager<P>>,
    nonces: Arc<NonceTracker<C>>,
    ledger: Arc<TransactionLedger>,
    resolver: Arc<TxResolver>,
    cfg: NodeConfig,
    /// The node's own address: sender of redemption transactions and
    /// destination of the channels it redeems from.
    self_address: Address,
    /// Channel-contract address redemption calls are sent to.
    contract: Address,
    /// Per-channel single-flight: present key means a run is in flight; the
    /// value collects joiners waiting for its result.
    inflight: SyncMutex<HashMap<ChannelId, JoinWaiters>>,
    sweeping: AtomicBool,
}

impl<C: ChainClient, P: CommitmentPublisher> RedemptionScheduler<C, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<C>,
        store: StateStore,
        commitments: Arc<CommitmentManager<P>>,
        nonces: Arc<NonceTracker<C>>,
        ledger: Arc<TransactionLedger>,
        resolver: Arc<TxResolver>,
        cfg: NodeConfig,
        self_address: Address,
        contract: Address,
    ) -> Self {
        Self {
            chain,
            store,
            commitments,
            nonces,
            ledger,
            resolver,
            cfg,
            self_address,
            contract,
            inflight: SyncMutex::new(HashMap::new()),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Drain one channel's acknowledged-ticket queue, oldest index first.
    ///
    /// Concurrent calls for the same channel join the in-flight drain and
    /// receive the same result; calls for different channels proceed
    /// independently.
    pub async fn redeem_channel(&self, channel: ChannelId) -> Result<ChannelRedemption, NodeError> {
        // the guard must leave scope before any await so the future stays
        // Send; an explicit drop() is not enough for the generator layout
        let join_rx = {
            let mut inflight = self.inflight.lock();
            if let Some(waiters) = inflight.get_mut(&channel) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            } else {
                inflight.insert(channel, Vec::new());
                None
            }
        };
        if let Some(rx) = join_rx {
            log::debug!("channel {channel}: joining in-flight redemption");
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(NodeError::RetriesExhausted {
                    attempts: 1,
                    last: "in-flight redemption task dropped".into(),
                }),
            };
        }

        let result = self.drain_channel(channel).await;

        let waiters = self.inflight.lock().remove(&channel).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Drain every open incoming channel, in ascending channel-id order so
    /// concurrent sweeps contend in the same order. Per-channel failures are
    /// collected, not propagated; only one sweep runs at a time.
    pub async fn redeem_all(&self) -> Result<SweepSummary, NodeError> {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            log::debug!("redemption sweep already running, skipping");
            return Ok(SweepSummary {
                skipped: true,
                ..SweepSummary::default()
            });
        }

        let channels = match self.store.incoming_channels(&self.self_address) {
            Ok(mut channels) => {
                channels.sort_by_key(|ch| ch.id);
                channels
            }
            Err(e) => {
                self.sweeping.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut summary = SweepSummary::default();
        for ch in channels {
            match self.redeem_channel(ch.id).await {
                Ok(redemption) => summary.redemptions.push(redemption),
                Err(e) => {
                    log::warn!("channel {}: redemption sweep failed: {e}", ch.id);
                    summary.failures.push((ch.id, e));
                }
            }
            tokio::task::yield_now().await;
        }

        self.sweeping.store(false, Ordering::SeqCst);
        Ok(summary)
    }

    async fn drain_channel(&self, channel: ChannelId) -> Result<ChannelRedemption, NodeError> {
        let mut summary = ChannelRedemption {
            channel,
            ..ChannelRedemption::default()
        };
        let mut last_index: Option<u64> = None;

        loop {
            let Some(mut ack) = self.store.oldest_unredeemed(&channel)? else {
                break;
            };
            // seeing the same index twice means the previous iteration
            // neither redeemed nor dropped it; spinning here could double
            // spend, so abort instead
            if last_index == Some(ack.ticket.index) {
                return Err(NodeError::RedemptionStalled {
                    channel,
                    index: ack.ticket.index,
                });
            }
            last_index = Some(ack.ticket.index);

            // reload per ticket: confirmed redemptions advance the channel
            // index and epoch concurrently via the indexer
            let ch = self
                .store
                .channel(&channel)?
                .ok_or(NodeError::UnknownChannel(channel))?;

            match self.redeem_one(&ch, &mut ack).await? {
                TicketOutcome::Redeemed { amount, tx } => {
                    metrics::tickets_redeemed_inc();
                    log::info!(
                        "channel {channel}: redeemed ticket {} for {amount} in tx {tx}",
                        ack.ticket.index
                    );
                    summary.redeemed += 1;
                    summary.total_amount = summary.total_amount.saturating_add(amount);
                }
                TicketOutcome::Rejected(reason) => {
                    metrics::tickets_rejected_inc();
                    log::warn!(
                        "channel {channel}: ticket {} rejected ({reason}), \
                         aborting the drain for this channel",
                        ack.ticket.index
                    );
                    summary.rejected += 1;
                    summary.rejection = Some(reason);
                    break;
                }
            }
        }
        Ok(summary)
    }

    /// Redeem a single acknowledged ticket.
    ///
    /// `Ok(Rejected(_))` is a definitive protocol verdict on the ticket;
    /// `Err(_)` is an infrastructure failure that leaves the ticket queued
    /// for a later attempt.
    async fn redeem_one(
        &self,
        ch: &Channel,
        ack: &mut AcknowledgedTicket,
    ) -> Result<TicketOutcome, NodeError> {
        if ack.ticket.channel_epoch != ch.channel_epoch {
            return Ok(TicketOutcome::Rejected(RejectReason::WrongEpoch));
        }

        let step = self.commitments.peek_preimage(ch.id).await?;
        ack.pre_image = step.hash;
        if let Err(reason) = check_acknowledged_ticket(ack) {
            return Ok(TicketOutcome::Rejected(reason));
        }

        // the nonce lock is held across the send so a concurrent sender on
        // this address cannot allocate the same nonce
        let lock = self.nonces.nonce_lock(self.self_address).await?;
        let payload = TxPayload {
            to: self.contract,
            data: encode_redeem_call(&ch.id, ack),
            value: 0,
            nonce: lock.next_nonce,
            gas_price: self.cfg.gas_price,
        };
        let hash = payload.hash();
        // register before submitting, so a resolution landing between the
        // send and the wait is buffered instead of lost
        let rx = self.resolver.register(hash);
        if let Err(e) = self
            .ledger
            .add_to_queuing(hash, self.self_address, payload.clone())
        {
            self.resolver.cancel(&hash);
            return Err(e.into());
        }

        match self.chain.send_signed_transaction(payload).await {
            Ok(_) => {
                if let Err(e) = self.ledger.move_to_pending(hash) {
                    self.resolver.cancel(&hash);
                    return Err(e.into());
                }
            }
            Err(e) if e.is_transient() => {
                // left in Queuing: the indexer resubmits once the provider
                // recovers, so keep waiting for the resolution below
                log::warn!("redemption tx {hash} not submitted ({e}), queued for resubmission");
            }
            Err(e) => {
                self.resolver.cancel(&hash);
                self.ledger.remove(&hash);
                return Err(e.into());
            }
        }
        drop(lock);

        match self
            .resolver
            .wait(hash, rx, self.cfg.redemption_timeout)
            .await?
        {
            TxResolution::Confirmed { block } => {
                // consume the revealed preimage only now that the chain
                // holds it
                self.commitments.bump(ch.id).await?;
                self.store.mark_redeemed(&ch.id, ack.ticket.index)?;
                log::debug!("redemption tx {hash} confirmed at block {block}");
                Ok(TicketOutcome::Redeemed {
                    amount: ack.ticket.amount,
                    tx: hash,
                })
            }
            TxResolution::Rejected { reason } => {
                self.ledger.remove(&hash);
                Err(NodeError::Provider(crate::chain::ProviderError::Unknown(
                    format!("redemption reverted: {reason}"),
                )))
            }
        }
    }
}

/// Deterministic call encoding for an on-chain redemption. The ABI framing
/// proper belongs to the transport; this byte layout is what the test double
/// and the transport agree on.
fn encode_redeem_call(channel: &ChannelId, ack: &AcknowledgedTicket) -> Vec<u8> {
    let t = &ack.ticket;
    let mut data = Vec::with_capacity(32 + 20 + 32 + 16 + 32 + 8 + 8 + 32 + 32 + 64);
    data.extend_from_slice(channel.as_bytes());
    data.extend_from_slice(t.counterparty.as_bytes());
    data.extend_from_slice(t.challenge.as_bytes());
    data.extend_from_slice(&t.amount.to_be_bytes());
    data.extend_from_slice(&t.win_prob);
    data.extend_from_slice(&t.channel_epoch.to_be_bytes());
    data.extend_from_slice(&t.index.to_be_bytes());
    data.extend_from_slice(ack.response.as_bytes());
    data.extend_from_slice(ack.pre_image.as_bytes());
    data.extend_from_slice(&t.signature);
    data
}
