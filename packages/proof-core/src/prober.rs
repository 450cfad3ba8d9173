//! Balance slot discovery for contracts with an unknown storage layout.

use alloc::vec::Vec;
use core::ops::Range;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{resolve, CheckpointLayout, CheckpointReadError, StorageCheckpoints},
    slot::holder_mapping_slot,
    Balance, StorageSource,
};

/// Declaration slots tried when the caller gives no range. Balance mappings
/// of deployed tokens sit well inside it.
pub const DEFAULT_SLOT_RANGE: Range<u64> = 0..20;

/// The storage layout families the prober knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// `mapping(address => uint256)`
    Mapping,
    /// `mapping(address => Checkpoint[])`, MiniMe style.
    Checkpoint,
}

impl LayoutKind {
    pub const ALL: [LayoutKind; 2] = [LayoutKind::Mapping, LayoutKind::Checkpoint];

    pub const fn as_str(self) -> &'static str {
        match self {
            LayoutKind::Mapping => "mapping",
            LayoutKind::Checkpoint => "checkpoint",
        }
    }
}

impl core::fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a holder's balance was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredSlot {
    pub layout: LayoutKind,
    /// Declaration slot of the balance mapping.
    pub index: u64,
    pub balance: BigUint,
    /// For checkpoint layouts, the array entry in effect at the target block.
    pub checkpoint_index: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    pub slot_range: Range<u64>,
    /// Families to try. Mapping is always tried before checkpoint.
    pub layouts: Vec<LayoutKind>,
    pub checkpoint_layout: CheckpointLayout,
    /// Block whose checkpoint is compared against the reference balance.
    pub target_block: u64,
}

impl ProbeConfig {
    pub fn new(target_block: u64) -> Self {
        Self {
            slot_range: DEFAULT_SLOT_RANGE,
            layouts: LayoutKind::ALL.to_vec(),
            checkpoint_layout: CheckpointLayout::MINIME,
            target_block,
        }
    }

    fn probes(&self, kind: LayoutKind) -> bool {
        self.layouts.contains(&kind)
    }
}

/// Search `config.slot_range` for the slot holding `reference` as `holder`'s
/// balance.
///
/// Returns `Ok(None)` when nothing matches, and without reading anything when
/// the reference balance is zero: every unused slot would match it. Storage
/// words that cannot be a checkpoint array disqualify that candidate only;
/// failures of `source` itself are returned.
pub async fn discover<S: StorageSource>(
    source: &S,
    holder: &[u8; 20],
    reference: &BigUint,
    config: &ProbeConfig,
) -> Result<Option<DiscoveredSlot>, S::Error> {
    if reference.is_zero() {
        return Ok(None);
    }

    if config.probes(LayoutKind::Mapping) {
        for index in config.slot_range.clone() {
            let word = source
                .storage_word(&holder_mapping_slot(holder, index))
                .await?;
            let balance = Balance::decode(&word, 0)?;
            if balance.magnitude() == reference {
                return Ok(Some(DiscoveredSlot {
                    layout: LayoutKind::Mapping,
                    index,
                    balance: reference.clone(),
                    checkpoint_index: None,
                }));
            }
        }
    }

    if config.probes(LayoutKind::Checkpoint) {
        for index in config.slot_range.clone() {
            let mut checkpoints =
                StorageCheckpoints::new(source, holder, index, config.checkpoint_layout);
            let resolved = match resolve(&mut checkpoints, config.target_block).await {
                Ok(resolved) => resolved,
                Err(CheckpointReadError::Source(err)) => return Err(err),
                Err(CheckpointReadError::Decode(_)) => continue,
            };
            if let Some((checkpoint_index, checkpoint)) = resolved.entry {
                if &checkpoint.value == reference {
                    return Ok(Some(DiscoveredSlot {
                        layout: LayoutKind::Checkpoint,
                        index,
                        balance: reference.clone(),
                        checkpoint_index: Some(checkpoint_index),
                    }));
                }
            }
        }
    }

    Ok(None)
}
