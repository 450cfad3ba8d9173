#![no_std]

//! Verification core for ERC20 balance storage proofs.
//!
//! Everything in here is pure: RLP decoding, trie walking, slot derivation,
//! balance decoding. The only suspension points are the storage reads made by
//! the layout prober and the checkpoint resolver, which go through the
//! [`StorageSource`] trait so callers decide where the words come from.

extern crate alloc;

pub mod account;
pub mod balance;
pub mod checkpoint;
pub mod error;
pub mod node;
pub mod prober;
pub mod rlp;
pub mod slot;
pub mod token;
pub mod verify;

use tiny_keccak::{Hasher, Keccak};

pub use account::{verify_account_proof, AccountRecord};
pub use balance::Balance;
pub use checkpoint::{
    resolve, Checkpoint, CheckpointLayout, CheckpointReadError, CheckpointSource,
    ResolvedCheckpoint, StorageCheckpoints,
};
pub use error::ProofError;
pub use node::{NodeRef, TrieNode};
pub use prober::{discover, DiscoveredSlot, LayoutKind, ProbeConfig, DEFAULT_SLOT_RANGE};
pub use slot::{array_element_slot, array_slot, holder_mapping_slot, mapping_slot, StorageKey};
pub use token::{
    verify_storage_proof, verify_token_balance, BalanceProof, StorageProof, TokenBalanceClaim,
    TokenVerification,
};
pub use verify::{lookup, verify_proof, Lookup};

/// Upper bound on the number of nodes visited by one trie walk.
///
/// A 32-byte key has 64 nibbles; every branch or extension consumes at least
/// one of them, so a legitimate walk never needs more than 65 steps.
pub const MAX_PROOF_DEPTH: usize = 65;

/// Largest trie node accepted from an untrusted proof.
pub const MAX_NODE_BYTES: usize = 4096;

/// Root hash of the empty trie, `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

/// A source of raw 32-byte storage words for one contract at one block.
///
/// The prober and the checkpoint resolver read through this trait so their
/// search logic runs unchanged against an RPC node or an in-memory fake.
#[allow(async_fn_in_trait)]
pub trait StorageSource {
    type Error: From<ProofError>;

    /// Read the storage word at `slot`. Missing slots read as all zeros.
    async fn storage_word(&self, slot: &StorageKey) -> Result<[u8; 32], Self::Error>;
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    keccak256_concat(&[data])
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    for part in parts {
        keccak.update(part);
    }
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}
