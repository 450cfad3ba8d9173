//! End-to-end verification of a token balance claim: account proof against the
//! block state root, then storage proofs against the account's storage root.

use alloc::vec::Vec;

use crate::{
    account::verify_account_proof,
    checkpoint::CheckpointLayout,
    rlp::{self, trim_leading_zeros},
    slot::{array_element_slot, holder_mapping_slot},
    verify::verify_proof,
    Balance, ProofError, StorageKey,
};

/// One entry of an EIP-1186 `storageProof` array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageProof {
    pub key: StorageKey,
    /// The storage word, big-endian. Leading zeros may be missing.
    pub value: Vec<u8>,
    pub proof: Vec<Vec<u8>>,
}

/// Check a storage proof against an account storage root.
///
/// Storage tries hold `rlp(word without leading zeros)` under
/// `keccak256(slot)`; zero words are not stored at all and are proven by
/// exclusion.
pub fn verify_storage_proof(storage_root: &[u8; 32], proof: &StorageProof) -> Result<(), ProofError> {
    let word = trim_leading_zeros(&proof.value);
    if word.len() > 32 {
        return Err(ProofError::DecodeUnderflow);
    }
    let expected = (!word.is_empty()).then(|| rlp::encode_bytes(word));
    verify_proof(
        storage_root,
        &proof.key.trie_key(),
        expected.as_deref(),
        &proof.proof,
    )
}

/// The storage evidence for a balance, by layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BalanceProof {
    /// The word at `mapping_slot(holder, slot_index)`.
    Mapping { slot: StorageProof },
    /// Checkpoint `index` of the holder's array together with the slot right
    /// after it. The checkpoint must be at or before the claimed block and the
    /// next one must be after it or not exist.
    Checkpoint {
        layout: CheckpointLayout,
        index: u64,
        checkpoint: StorageProof,
        next: StorageProof,
    },
}

/// Everything needed to check a holder's balance offline, given a trusted
/// state root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBalanceClaim {
    pub contract: [u8; 20],
    pub holder: [u8; 20],
    pub block_number: u64,
    pub state_root: [u8; 32],
    pub decimals: u32,
    /// Declaration slot of the balance mapping.
    pub slot_index: u64,
    pub account_proof: Vec<Vec<u8>>,
    pub balance_proof: BalanceProof,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenVerification {
    Verified {
        balance: Balance,
        storage_root: [u8; 32],
        /// `from_block` of the checkpoint in effect, for checkpoint layouts.
        checkpoint_block: Option<u64>,
    },
    Rejected(ProofError),
}

impl TokenVerification {
    pub fn is_verified(&self) -> bool {
        matches!(self, TokenVerification::Verified { .. })
    }
}

/// Verify `claim` and report the proven balance or the first failure.
pub fn verify_token_balance(claim: &TokenBalanceClaim) -> TokenVerification {
    match verify_claim(claim) {
        Ok((balance, storage_root, checkpoint_block)) => TokenVerification::Verified {
            balance,
            storage_root,
            checkpoint_block,
        },
        Err(err) => TokenVerification::Rejected(err),
    }
}

fn verify_claim(claim: &TokenBalanceClaim) -> Result<(Balance, [u8; 32], Option<u64>), ProofError> {
    let account = verify_account_proof(&claim.state_root, &claim.contract, &claim.account_proof)?;
    let storage_root = account.storage_root;
    let holder_slot = holder_mapping_slot(&claim.holder, claim.slot_index);

    match &claim.balance_proof {
        BalanceProof::Mapping { slot } => {
            if slot.key != holder_slot {
                return Err(ProofError::PathMismatch);
            }
            verify_storage_proof(&storage_root, slot)?;
            let balance = Balance::decode(&slot.value, claim.decimals)?;
            Ok((balance, storage_root, None))
        }
        BalanceProof::Checkpoint {
            layout,
            index,
            checkpoint,
            next,
        } => {
            let next_index = index.checked_add(1).ok_or(ProofError::DecodeUnderflow)?;
            if checkpoint.key != array_element_slot(&holder_slot, *index)
                || next.key != array_element_slot(&holder_slot, next_index)
            {
                return Err(ProofError::PathMismatch);
            }
            verify_storage_proof(&storage_root, checkpoint)?;
            verify_storage_proof(&storage_root, next)?;

            // An empty slot past the end of the array is not an entry.
            if trim_leading_zeros(&checkpoint.value).is_empty() {
                return Err(ProofError::ValueMismatch);
            }
            let current = layout.unpack(&checkpoint.value)?;
            if current.from_block > claim.block_number {
                return Err(ProofError::ValueMismatch);
            }
            if !trim_leading_zeros(&next.value).is_empty()
                && layout.unpack(&next.value)?.from_block <= claim.block_number
            {
                return Err(ProofError::ValueMismatch);
            }

            let balance = Balance::new(current.value, claim.decimals);
            Ok((balance, storage_root, Some(current.from_block)))
        }
    }
}
