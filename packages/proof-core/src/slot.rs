//! Solidity storage-layout key derivation.
//!
//! Integers are encoded big-endian and left-padded with zeros to 32 bytes
//! before hashing. Skipping the padding still produces a valid-looking key,
//! just the wrong one.

use serde::{Deserialize, Serialize};

use crate::{keccak256, keccak256_concat};

/// A 32-byte storage slot key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(pub [u8; 32]);

impl StorageKey {
    /// The key of a plain slot index, e.g. the declaration slot of a state variable.
    pub const fn from_index(index: u64) -> Self {
        StorageKey(u64_to_bytes32(index))
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `self + offset`, wrapping at 2^256 like the EVM does.
    pub fn offset(&self, offset: u64) -> Self {
        let mut out = self.0;
        let mut carry = offset as u128;
        for byte in out.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = *byte as u128 + (carry & 0xff);
            *byte = sum as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        StorageKey(out)
    }

    /// The path under which this slot is stored in the account's storage trie.
    pub fn trie_key(&self) -> [u8; 32] {
        keccak256(&self.0)
    }
}

impl From<[u8; 32]> for StorageKey {
    fn from(value: [u8; 32]) -> Self {
        StorageKey(value)
    }
}

impl AsRef<[u8]> for StorageKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Slot of `mapping[key]` for a mapping declared at `base_slot`.
pub fn mapping_slot(key: &[u8; 32], base_slot: u64) -> StorageKey {
    StorageKey(keccak256_concat(&[key, &u64_to_bytes32(base_slot)]))
}

/// Slot of `mapping[holder]` for an address-keyed mapping.
pub fn holder_mapping_slot(holder: &[u8; 20], base_slot: u64) -> StorageKey {
    mapping_slot(&address_to_bytes32(holder), base_slot)
}

/// First element slot of a dynamic array whose length lives at `base`.
pub fn array_slot(base: &StorageKey) -> StorageKey {
    StorageKey(keccak256(&base.0))
}

/// Slot of element `index` of a dynamic array whose length lives at `base`.
///
/// Elements are assumed to occupy one word each; packing several values into
/// a word is left to the decoder of that word.
pub fn array_element_slot(base: &StorageKey, index: u64) -> StorageKey {
    array_slot(base).offset(index)
}

pub const fn u64_to_bytes32(value: u64) -> [u8; 32] {
    let be = value.to_be_bytes();
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 8 {
        out[24 + i] = be[i];
        i += 1;
    }
    out
}

pub fn address_to_bytes32(address: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address);
    out
}
