//! Account records and account-trie proofs (EIP-1186 `accountProof`).

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::{
    keccak256,
    rlp::{self, trim_leading_zeros, RlpItem},
    verify::{lookup, Lookup},
    ProofError,
};

/// The value stored under `keccak256(address)` in the state trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub nonce: u64,
    /// Ether balance, big-endian without leading zeros.
    pub balance: Vec<u8>,
    pub storage_root: [u8; 32],
    pub code_hash: [u8; 32],
}

impl AccountRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProofError> {
        let fields = RlpItem::decode(bytes)?.items()?;
        let [nonce, balance, storage_root, code_hash] = fields.as_slice() else {
            return Err(ProofError::MalformedEncoding);
        };

        let nonce = nonce.bytes()?;
        let balance = balance.bytes()?;
        if nonce.len() > 8 || balance.len() > 32 {
            return Err(ProofError::DecodeUnderflow);
        }
        if nonce.first() == Some(&0) || balance.first() == Some(&0) {
            return Err(ProofError::MalformedEncoding);
        }

        let mut nonce_be = [0u8; 8];
        nonce_be[8 - nonce.len()..].copy_from_slice(nonce);

        Ok(Self {
            nonce: u64::from_be_bytes(nonce_be),
            balance: balance.to_vec(),
            storage_root: hash_field(storage_root)?,
            code_hash: hash_field(code_hash)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_uint(self.nonce),
            rlp::encode_bytes(trim_leading_zeros(&self.balance)),
            rlp::encode_bytes(&self.storage_root),
            rlp::encode_bytes(&self.code_hash),
        ])
    }
}

fn hash_field(item: &RlpItem<'_>) -> Result<[u8; 32], ProofError> {
    let bytes = item.bytes()?;
    if bytes.len() != 32 {
        return Err(ProofError::MalformedEncoding);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Verify an account proof against a block state root and return the account.
///
/// The account must exist: a proof of absence is rejected like a value that
/// does not match.
pub fn verify_account_proof(
    state_root: &[u8; 32],
    address: &[u8; 20],
    proof: &[Vec<u8>],
) -> Result<AccountRecord, ProofError> {
    match lookup(state_root, &keccak256(address), proof)? {
        Lookup::Value(value) => AccountRecord::decode(&value),
        Lookup::Empty => Err(ProofError::ValueMismatch),
        Lookup::Diverged => Err(ProofError::PathMismatch),
    }
}
