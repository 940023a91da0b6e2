//! Commitment chain lifecycle.
//!
//! Wraps the pure chain math from `tollgate-core` with the on-chain
//! publication step and the concurrency discipline around it: per channel,
//! only the first `initialize` caller generates and publishes a chain;
//! concurrent callers wait on the same per-channel lock and then observe the
//! already-initialized state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use rand::rngs::OsRng;
use tokio::sync::Mutex;

use tollgate_core::commitment::{self, ChainStep};
use tollgate_core::kv::KvStore;
use tollgate_core::{ChannelId, CoreError, Hash32};

use crate::chain::ProviderError;
use crate::error::NodeError;

/// Publishes a chain head as the channel's on-chain commitment.
///
/// The production implementation wraps the chain client plus the contract
/// ABI; it is a separate capability because commitment publication is the
/// only contract call this module makes.
pub trait CommitmentPublisher: Send + Sync + 'static {
    fn publish(
        &self,
        channel: ChannelId,
        commitment: Hash32,
    ) -> impl Future<Output = Result<Hash32, ProviderError>> + Send;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// A stored chain already resolves to the on-chain commitment.
    Reused,
    /// A fresh chain was generated, persisted, and its head published.
    Generated,
}

pub struct CommitmentManager<P> {
    kv: Arc<dyn KvStore>,
    publisher: Arc<P>,
    // per-channel init/bump serialization
    locks: SyncMutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl<P: CommitmentPublisher> CommitmentManager<P> {
    pub fn new(kv: Arc<dyn KvStore>, publisher: Arc<P>) -> Self {
        Self {
            kv,
            publisher,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn channel_lock(&self, channel: ChannelId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(channel)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Ensure a usable chain exists for `channel` and matches
    /// `on_chain_commitment`. Idempotent: a second call with the same
    /// commitment neither regenerates nor republishes.
    pub async fn initialize(
        &self,
        channel: ChannelId,
        on_chain_commitment: Hash32,
    ) -> Result<InitOutcome, NodeError> {
        let lock = self.channel_lock(channel);
        let _guard = lock.lock().await;

        if !on_chain_commitment.is_zero()
            && commitment::resolves_to(self.kv.as_ref(), &channel, &on_chain_commitment)?
        {
            log::debug!("channel {channel}: stored commitment chain reused");
            return Ok(InitOutcome::Reused);
        }

        if commitment::load_current(self.kv.as_ref(), &channel)?.is_some() {
            // A chain exists locally but does not resolve to what is on
            // chain, e.g. after an external reinitialization of the channel.
            log::warn!(
                "channel {channel}: stored chain does not resolve to on-chain commitment \
                 {on_chain_commitment}, regenerating"
            );
        }

        self.generate_and_publish(channel).await?;
        Ok(InitOutcome::Generated)
    }

    /// The chain step matching the last published commitment. Lazily creates
    /// and publishes a chain when none is stored.
    pub async fn current(&self, channel: ChannelId) -> Result<ChainStep, NodeError> {
        if let Some(step) = commitment::load_current(self.kv.as_ref(), &channel)? {
            return Ok(step);
        }
        let lock = self.channel_lock(channel);
        let _guard = lock.lock().await;
        // re-check under the lock: a concurrent caller may have initialized
        if let Some(step) = commitment::load_current(self.kv.as_ref(), &channel)? {
            return Ok(step);
        }
        self.generate_and_publish(channel).await?;
        commitment::load_current(self.kv.as_ref(), &channel)?
            .ok_or_else(|| CoreError::ChainNotInitialized(channel).into())
    }

    /// The preimage the next redemption will reveal, without consuming it.
    /// A redemption validates and submits against this value and only calls
    /// [`bump`](Self::bump) once the submission confirmed, so a failed
    /// submission does not burn a chain step.
    pub async fn peek_preimage(&self, channel: ChannelId) -> Result<ChainStep, NodeError> {
        let lock = self.channel_lock(channel);
        let _guard = lock.lock().await;

        let current = commitment::load_current(self.kv.as_ref(), &channel)?
            .ok_or(CoreError::ChainNotInitialized(channel))?;
        match commitment::find_preimage(self.kv.as_ref(), &channel, &current) {
            Ok(pre) => Ok(pre),
            Err(CoreError::PreImageNotFound(_)) => Err(NodeError::CorruptedChain(channel)),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance to the preimage of the current step, consuming it.
    ///
    /// On `PreImageNotFound` the chain is corrupt: unredeemed tickets issued
    /// against it can no longer be proven, which is surfaced loudly rather
    /// than hidden. The caller decides when to `regenerate`.
    pub async fn bump(&self, channel: ChannelId) -> Result<ChainStep, NodeError> {
        let lock = self.channel_lock(channel);
        let _guard = lock.lock().await;

        let current = commitment::load_current(self.kv.as_ref(), &channel)?
            .ok_or(CoreError::ChainNotInitialized(channel))?;
        match commitment::find_preimage(self.kv.as_ref(), &channel, &current) {
            Ok(pre) => {
                commitment::store_current(self.kv.as_ref(), &channel, &pre)?;
                Ok(pre)
            }
            Err(CoreError::PreImageNotFound(_)) => {
                log::error!(
                    "channel {channel}: commitment chain corrupted at iteration {}, \
                     tickets against the old chain are no longer provable",
                    current.iteration
                );
                Err(NodeError::CorruptedChain(channel))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a corrupted or exhausted chain with a fresh one and publish
    /// the new head.
    pub async fn regenerate(&self, channel: ChannelId) -> Result<Hash32, NodeError> {
        let lock = self.channel_lock(channel);
        let _guard = lock.lock().await;
        self.generate_and_publish(channel).await
    }

    async fn generate_and_publish(&self, channel: ChannelId) -> Result<Hash32, NodeError> {
        let chain = commitment::generate(&mut OsRng);
        let head = chain.head();
        commitment::store_checkpoints(self.kv.as_ref(), &channel, &chain)?;
        // publish before marking initialized: if the publication fails, the
        // next initialize starts over instead of trusting an unpublished head
        let tx = self.publisher.publish(channel, head).await?;
        commitment::store_current(
            self.kv.as_ref(),
            &channel,
            &ChainStep {
                iteration: commitment::TOTAL_ITERATIONS,
                hash: head,
            },
        )?;
        log::info!("channel {channel}: published commitment {head} in tx {tx}");
        Ok(head)
    }
}
