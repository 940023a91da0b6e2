//! Commitment hash-chain construction and interval-indexed recovery.
//!
//! A chain is `TOTAL_ITERATIONS` applications of Keccak-256 to a random seed.
//! The terminal hash is published on chain as the channel's commitment; each
//! redemption then reveals the next preimage walking backwards towards the
//! seed, so revealing step `i` is useless for forging step `i + 1`.
//!
//! Only every `CHECKPOINT_STRIDE`-th intermediate value is persisted. Finding
//! the preimage of the current step costs at most one stride of recomputation
//! from the nearest-preceding checkpoint.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{chain_step, iterate};
use crate::keys;
use crate::kv::{self, KvStore, WriteBatch};
use crate::types::{ChannelId, Hash32};

/// Length of a commitment chain.
pub const TOTAL_ITERATIONS: u64 = 100_000;
/// Persistence stride for intermediate values.
pub const CHECKPOINT_STRIDE: u64 = 10_000;

/// One revealed (or revealable) position on a chain.
///
/// `iteration` counts forward from the seed: the seed sits at iteration 0 and
/// the published commitment at `TOTAL_ITERATIONS`. Revealing proceeds from
/// high iterations to low ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub iteration: u64,
    pub hash: Hash32,
}

/// A freshly generated chain, before any step has been consumed.
#[derive(Clone, Debug)]
pub struct GeneratedChain {
    checkpoints: Vec<ChainStep>,
    head: Hash32,
}

impl GeneratedChain {
    /// The terminal hash, published on chain as the commitment.
    pub fn head(&self) -> Hash32 {
        self.head
    }
}

/// Generate a fresh chain from a random 32-byte seed, collecting every
/// `CHECKPOINT_STRIDE`-th intermediate value (the seed and the head
/// included).
pub fn generate<R: RngCore>(rng: &mut R) -> GeneratedChain {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);

    let mut checkpoints = Vec::with_capacity((TOTAL_ITERATIONS / CHECKPOINT_STRIDE + 1) as usize);
    let mut value = Hash32(seed);
    checkpoints.push(ChainStep {
        iteration: 0,
        hash: value,
    });
    for i in 1..=TOTAL_ITERATIONS {
        value = chain_step(&value);
        if i % CHECKPOINT_STRIDE == 0 {
            checkpoints.push(ChainStep {
                iteration: i,
                hash: value,
            });
        }
    }
    GeneratedChain {
        checkpoints,
        head: value,
    }
}

/// Persist a generated chain's checkpoints in one batch, so a crash cannot
/// leave a torn chain. The current step is stored separately (see
/// [`store_current`]) once the head has been published on chain.
pub fn store_checkpoints(
    kv: &dyn KvStore,
    id: &ChannelId,
    chain: &GeneratedChain,
) -> Result<(), CoreError> {
    let mut batch = WriteBatch::new();
    for cp in &chain.checkpoints {
        batch.put_typed(keys::commitment_checkpoint(id, cp.iteration), &cp.hash)?;
    }
    kv.write_batch(batch)?;
    Ok(())
}

/// The chain step matching the last published on-chain commitment, if a
/// chain has been stored for this channel.
pub fn load_current(kv: &dyn KvStore, id: &ChannelId) -> Result<Option<ChainStep>, CoreError> {
    Ok(kv::get_typed(kv, &keys::commitment_current(id))?)
}

pub fn store_current(kv: &dyn KvStore, id: &ChannelId, step: &ChainStep) -> Result<(), CoreError> {
    kv::put_typed(kv, &keys::commitment_current(id), step)?;
    Ok(())
}

fn load_checkpoint(
    kv: &dyn KvStore,
    id: &ChannelId,
    iteration: u64,
) -> Result<Option<Hash32>, CoreError> {
    Ok(kv::get_typed(kv, &keys::commitment_checkpoint(id, iteration))?)
}

/// Whether the locally stored chain resolves to `commitment`, i.e. the
/// stored head equals what is published on chain.
pub fn resolves_to(
    kv: &dyn KvStore,
    id: &ChannelId,
    commitment: &Hash32,
) -> Result<bool, CoreError> {
    match load_checkpoint(kv, id, TOTAL_ITERATIONS)? {
        Some(head) => Ok(head == *commitment),
        None => Ok(false),
    }
}

/// Find the preimage of `target` on this channel's stored chain.
///
/// Fast path: recompute from the checkpoint directly preceding
/// `target.iteration - 1` and verify the result hashes back to `target`.
/// If that fails (the stored iteration index disagrees with the stored
/// values), fall back to scanning every checkpoint. Only when no checkpoint
/// reaches `target` within the chain length is the chain declared corrupt.
pub fn find_preimage(
    kv: &dyn KvStore,
    id: &ChannelId,
    target: &ChainStep,
) -> Result<ChainStep, CoreError> {
    if target.iteration == 0 {
        // The seed has no preimage: the chain is fully consumed.
        return Err(CoreError::PreImageNotFound(*id));
    }

    let want = target.iteration - 1;
    let base = want - (want % CHECKPOINT_STRIDE);
    if let Some(start) = load_checkpoint(kv, id, base)? {
        let candidate = iterate(&start, want - base);
        if chain_step(&candidate) == target.hash {
            return Ok(ChainStep {
                iteration: want,
                hash: candidate,
            });
        }
        log::warn!(
            "channel {id}: checkpoint at iteration {base} does not reach current step, \
             falling back to full checkpoint scan"
        );
    }

    search_preimage(kv, id, &target.hash)
}

/// Scan all stored checkpoints for a value whose next hash equals `target`.
fn search_preimage(
    kv: &dyn KvStore,
    id: &ChannelId,
    target: &Hash32,
) -> Result<ChainStep, CoreError> {
    let entries = kv.iter_prefix(&keys::commitment_checkpoint_prefix(id))?;
    if entries.is_empty() {
        return Err(CoreError::ChainNotInitialized(*id));
    }
    for (key, value) in entries {
        let suffix = key
            .len()
            .checked_sub(8)
            .map(|at| &key[at..])
            .unwrap_or(&[]);
        let iteration = match <[u8; 8]>::try_from(suffix) {
            Ok(raw) => u64::from_be_bytes(raw),
            Err(_) => continue,
        };
        let start: Hash32 =
            bincode::deserialize(&value).map_err(|e| CoreError::Codec(e.to_string()))?;

        let mut current = start;
        let limit = CHECKPOINT_STRIDE.min(TOTAL_ITERATIONS - iteration.min(TOTAL_ITERATIONS));
        for offset in 0..limit {
            let next = chain_step(&current);
            if next == *target {
                return Ok(ChainStep {
                    iteration: iteration + offset,
                    hash: current,
                });
            }
            current = next;
        }
    }
    Err(CoreError::PreImageNotFound(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use rand::rngs::mock::StepRng;

    fn setup() -> (MemoryKv, ChannelId, GeneratedChain) {
        let kv = MemoryKv::new();
        let id = ChannelId::from_bytes([7u8; 32]);
        let mut rng = StepRng::new(42, 13);
        let chain = generate(&mut rng);
        store_checkpoints(&kv, &id, &chain).unwrap();
        store_current(
            &kv,
            &id,
            &ChainStep {
                iteration: TOTAL_ITERATIONS,
                hash: chain.head(),
            },
        )
        .unwrap();
        (kv, id, chain)
    }

    #[test]
    fn generated_chain_head_matches_forward_iteration() {
        let mut rng = StepRng::new(1, 1);
        let chain = generate(&mut rng);
        let seed = chain.checkpoints[0].hash;
        assert_eq!(iterate(&seed, TOTAL_ITERATIONS), chain.head());
        // each checkpoint is one stride of hashing past the previous
        for pair in chain.checkpoints.windows(2) {
            assert_eq!(iterate(&pair[0].hash, CHECKPOINT_STRIDE), pair[1].hash);
        }
    }

    #[test]
    fn stored_chain_resolves_to_its_head() {
        let (kv, id, chain) = setup();
        assert!(resolves_to(&kv, &id, &chain.head()).unwrap());
        assert!(!resolves_to(&kv, &id, &Hash32([0xee; 32])).unwrap());
    }

    #[test]
    fn bumping_from_head_walks_the_chain_backwards() {
        let (kv, id, chain) = setup();
        let seed = chain.checkpoints[0].hash;
        let mut current = load_current(&kv, &id).unwrap().unwrap();
        // walk a few steps back across a checkpoint boundary
        for k in 1..=3u64 {
            current = find_preimage(&kv, &id, &current).unwrap();
            store_current(&kv, &id, &current).unwrap();
            assert_eq!(current.iteration, TOTAL_ITERATIONS - k);
            assert_eq!(iterate(&seed, TOTAL_ITERATIONS - k), current.hash);
            // the invariant the whole scheme rests on
            assert_eq!(chain_step(&current.hash), iterate(&seed, TOTAL_ITERATIONS - k + 1));
        }
    }

    #[test]
    fn preimage_of_foreign_value_is_not_found() {
        let (kv, id, _) = setup();
        let bogus = ChainStep {
            iteration: 50,
            hash: Hash32([0xcd; 32]),
        };
        assert_eq!(
            find_preimage(&kv, &id, &bogus),
            Err(CoreError::PreImageNotFound(id))
        );
    }

    #[test]
    fn seed_has_no_preimage() {
        let (kv, id, chain) = setup();
        let seed_step = ChainStep {
            iteration: 0,
            hash: chain.checkpoints[0].hash,
        };
        assert_eq!(
            find_preimage(&kv, &id, &seed_step),
            Err(CoreError::PreImageNotFound(id))
        );
    }

    #[test]
    fn fallback_scan_recovers_from_wrong_iteration_index() {
        let (kv, id, chain) = setup();
        let seed = chain.checkpoints[0].hash;
        // current step with a corrupted iteration index but a real hash
        let real = iterate(&seed, 25_000);
        let skewed = ChainStep {
            iteration: 30_000,
            hash: real,
        };
        let pre = find_preimage(&kv, &id, &skewed).unwrap();
        assert_eq!(pre.iteration, 24_999);
        assert_eq!(chain_step(&pre.hash), real);
    }

    #[test]
    fn missing_chain_reports_uninitialized() {
        let kv = MemoryKv::new();
        let id = ChannelId::from_bytes([1u8; 32]);
        let step = ChainStep {
            iteration: 10,
            hash: Hash32([2u8; 32]),
        };
        assert_eq!(
            find_preimage(&kv, &id, &step),
            Err(CoreError::ChainNotInitialized(id))
        );
    }
}
