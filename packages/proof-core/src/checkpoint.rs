//! MiniMe-style balance checkpoints.
//!
//! A MiniMe token keeps, per holder, an append-only array of
//! `struct Checkpoint { uint128 fromBlock; uint128 value; }`. Both members are
//! packed into one storage word, the first member in the low-order bytes.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{
    rlp::trim_leading_zeros,
    slot::{array_element_slot, holder_mapping_slot},
    ProofError, StorageKey, StorageSource,
};

/// Checkpoint arrays longer than this are taken as a sign that the slot is
/// not a checkpoint array at all.
pub const MAX_CHECKPOINTS: u64 = u32::MAX as u64;

/// How a checkpoint word is split between block number and value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointLayout {
    block_bits: u32,
}

impl Default for CheckpointLayout {
    fn default() -> Self {
        Self::MINIME
    }
}

impl CheckpointLayout {
    /// `uint128 fromBlock` low, `uint128 value` high.
    pub const MINIME: Self = Self { block_bits: 128 };

    /// A layout with the block number in the low `block_bits` bits. The split
    /// must fall on a byte boundary and leave room for a value.
    pub fn new(block_bits: u32) -> Option<Self> {
        (block_bits > 0 && block_bits < 256 && block_bits % 8 == 0).then_some(Self { block_bits })
    }

    pub fn block_bits(&self) -> u32 {
        self.block_bits
    }

    fn split(&self) -> usize {
        32 - (self.block_bits / 8) as usize
    }

    pub fn unpack(&self, word: &[u8]) -> Result<Checkpoint, ProofError> {
        let trimmed = trim_leading_zeros(word);
        if trimmed.len() > 32 {
            return Err(ProofError::DecodeUnderflow);
        }
        let mut full = [0u8; 32];
        full[32 - trimmed.len()..].copy_from_slice(trimmed);

        let split = self.split();
        let block = trim_leading_zeros(&full[split..]);
        if block.len() > 8 {
            return Err(ProofError::DecodeUnderflow);
        }
        let mut block_be = [0u8; 8];
        block_be[8 - block.len()..].copy_from_slice(block);

        Ok(Checkpoint {
            from_block: u64::from_be_bytes(block_be),
            value: BigUint::from_bytes_be(&full[..split]),
        })
    }

    pub fn pack(&self, checkpoint: &Checkpoint) -> Result<[u8; 32], ProofError> {
        let split = self.split();
        let value = checkpoint.value.to_bytes_be();
        let value = trim_leading_zeros(&value);
        if value.len() > split {
            return Err(ProofError::DecodeUnderflow);
        }

        let mut out = [0u8; 32];
        out[split - value.len()..split].copy_from_slice(value);
        out[24..].copy_from_slice(&checkpoint.from_block.to_be_bytes());
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub from_block: u64,
    pub value: BigUint,
}

/// Lazily fetched, ordered checkpoints.
#[allow(async_fn_in_trait)]
pub trait CheckpointSource {
    type Error;

    async fn count(&mut self) -> Result<u64, Self::Error>;

    async fn checkpoint(&mut self, index: u64) -> Result<Checkpoint, Self::Error>;
}

/// The checkpoint in effect at a block, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCheckpoint {
    /// Length of the checkpoint array.
    pub count: u64,
    /// Index and content of the newest checkpoint at or before the block.
    pub entry: Option<(u64, Checkpoint)>,
}

impl ResolvedCheckpoint {
    /// The balance at the block; zero before the first checkpoint.
    pub fn value(&self) -> BigUint {
        self.entry
            .as_ref()
            .map(|(_, checkpoint)| checkpoint.value.clone())
            .unwrap_or_default()
    }
}

/// Find the checkpoint in effect at `target_block`.
///
/// The newest checkpoint is tried first since most queries are for recent
/// blocks; otherwise a binary search over the remaining entries finds the
/// last checkpoint with `from_block <= target_block`. With repeated block
/// numbers the last one in array order wins.
pub async fn resolve<S: CheckpointSource>(
    source: &mut S,
    target_block: u64,
) -> Result<ResolvedCheckpoint, S::Error> {
    let count = source.count().await?;
    if count == 0 {
        return Ok(ResolvedCheckpoint { count, entry: None });
    }

    let last_index = count - 1;
    let last = source.checkpoint(last_index).await?;
    if last.from_block <= target_block {
        return Ok(ResolvedCheckpoint {
            count,
            entry: Some((last_index, last)),
        });
    }

    let (mut lo, mut hi) = (0u64, last_index);
    let mut entry = None;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let checkpoint = source.checkpoint(mid).await?;
        if checkpoint.from_block <= target_block {
            entry = Some((mid, checkpoint));
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    Ok(ResolvedCheckpoint { count, entry })
}

/// Why reading a checkpoint out of contract storage failed.
#[derive(Debug)]
pub enum CheckpointReadError<E> {
    /// The storage source itself failed.
    Source(E),
    /// A word was read but is not a plausible checkpoint.
    Decode(ProofError),
}

impl<E> From<ProofError> for CheckpointReadError<E> {
    fn from(err: ProofError) -> Self {
        CheckpointReadError::Decode(err)
    }
}

impl<E: core::fmt::Display> core::fmt::Display for CheckpointReadError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Source(err) => write!(f, "checkpoint read failed: {err}"),
            Self::Decode(err) => write!(f, "invalid checkpoint word: {err}"),
        }
    }
}

/// The checkpoint array of one holder in a `mapping(address => Checkpoint[])`
/// declared at `base_slot`.
pub struct StorageCheckpoints<'a, S> {
    source: &'a S,
    length_slot: StorageKey,
    layout: CheckpointLayout,
    count: Option<u64>,
}

impl<'a, S: StorageSource> StorageCheckpoints<'a, S> {
    pub fn new(source: &'a S, holder: &[u8; 20], base_slot: u64, layout: CheckpointLayout) -> Self {
        Self {
            source,
            length_slot: holder_mapping_slot(holder, base_slot),
            layout,
            count: None,
        }
    }

    /// Slot holding the array length.
    pub fn length_slot(&self) -> StorageKey {
        self.length_slot
    }

    /// Slot holding checkpoint `index`.
    pub fn element_slot(&self, index: u64) -> StorageKey {
        array_element_slot(&self.length_slot, index)
    }
}

impl<S: StorageSource> CheckpointSource for StorageCheckpoints<'_, S> {
    type Error = CheckpointReadError<S::Error>;

    async fn count(&mut self) -> Result<u64, Self::Error> {
        if let Some(count) = self.count {
            return Ok(count);
        }

        let word = self
            .source
            .storage_word(&self.length_slot)
            .await
            .map_err(CheckpointReadError::Source)?;
        let trimmed = trim_leading_zeros(&word);
        if trimmed.len() > 8 {
            return Err(ProofError::DecodeUnderflow.into());
        }
        let mut be = [0u8; 8];
        be[8 - trimmed.len()..].copy_from_slice(trimmed);
        let count = u64::from_be_bytes(be);
        if count > MAX_CHECKPOINTS {
            return Err(ProofError::DecodeUnderflow.into());
        }

        self.count = Some(count);
        Ok(count)
    }

    async fn checkpoint(&mut self, index: u64) -> Result<Checkpoint, Self::Error> {
        let word = self
            .source
            .storage_word(&self.element_slot(index))
            .await
            .map_err(CheckpointReadError::Source)?;
        Ok(self.layout.unpack(&word)?)
    }
}
