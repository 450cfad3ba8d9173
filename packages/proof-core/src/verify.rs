//! Merkle-Patricia proof walking.
//!
//! The walk starts from a trusted root hash and only ever follows references
//! that were read out of nodes already bound to that root, so a node can only
//! enter the walk by hashing to what its parent committed to.

use alloc::{collections::BTreeMap, vec::Vec};

use crate::{
    keccak256,
    node::{to_nibbles, NodeRef, TrieNode},
    ProofError, EMPTY_TRIE_ROOT, MAX_NODE_BYTES, MAX_PROOF_DEPTH,
};

/// What a proof says is stored under a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The key is present with this value.
    Value(Vec<u8>),
    /// The walk ended on an empty child reference or an empty branch value.
    Empty,
    /// A leaf or extension path split away from the key.
    Diverged,
}

/// Walk `proof` from `root` along `key` and report what is stored there.
///
/// Proof nodes may come in any order and may repeat; they are looked up by
/// hash. Inline children are decoded from the bytes embedded in their parent.
pub fn lookup(root: &[u8; 32], key: &[u8; 32], proof: &[Vec<u8>]) -> Result<Lookup, ProofError> {
    if *root == EMPTY_TRIE_ROOT {
        return Ok(Lookup::Empty);
    }

    let nodes = index_proof(proof)?;
    let key_nibbles = to_nibbles(key);
    let mut cursor = 0usize;
    let mut current = NodeRef::Hash(*root);

    for _ in 0..MAX_PROOF_DEPTH {
        let node = match &current {
            NodeRef::Empty => return Ok(Lookup::Empty),
            NodeRef::Inline(raw) => TrieNode::decode(raw)?,
            NodeRef::Hash(hash) => {
                let encoded = nodes.get(hash).ok_or(ProofError::ProofNodeMissing)?;
                TrieNode::decode(encoded)?
            }
        };

        let remaining = &key_nibbles[cursor..];
        match node {
            TrieNode::Branch {
                mut children,
                value,
            } => {
                let Some(&nibble) = remaining.first() else {
                    return Ok(value.map_or(Lookup::Empty, Lookup::Value));
                };
                current = core::mem::take(&mut children[nibble as usize]);
                cursor += 1;
            }
            TrieNode::Extension { path, child } => {
                if remaining.is_empty() {
                    return Err(ProofError::ProofIncomplete);
                }
                if !remaining.starts_with(&path) {
                    return Ok(Lookup::Diverged);
                }
                cursor += path.len();
                current = child;
            }
            TrieNode::Leaf { path, value } => {
                if remaining != path.as_slice() {
                    return Ok(Lookup::Diverged);
                }
                return Ok(Lookup::Value(value));
            }
        }
    }

    Err(ProofError::ProofIncomplete)
}

/// Check that `proof` binds `key` to `expected` under `root`.
///
/// `expected = None` (or an empty value) asks for an exclusion proof: the
/// walk must end on an empty reference or on a path that splits from the key.
pub fn verify_proof(
    root: &[u8; 32],
    key: &[u8; 32],
    expected: Option<&[u8]>,
    proof: &[Vec<u8>],
) -> Result<(), ProofError> {
    let expected = expected.filter(|value| !value.is_empty());

    match (lookup(root, key, proof)?, expected) {
        (Lookup::Value(found), Some(expected)) if found == expected => Ok(()),
        (Lookup::Value(_), _) => Err(ProofError::ValueMismatch),
        (Lookup::Empty | Lookup::Diverged, None) => Ok(()),
        (Lookup::Empty, Some(_)) => Err(ProofError::ValueMismatch),
        (Lookup::Diverged, Some(_)) => Err(ProofError::PathMismatch),
    }
}

fn index_proof(proof: &[Vec<u8>]) -> Result<BTreeMap<[u8; 32], &[u8]>, ProofError> {
    let mut nodes = BTreeMap::new();
    for node in proof {
        if node.len() > MAX_NODE_BYTES {
            return Err(ProofError::MalformedNode);
        }
        nodes.insert(keccak256(node), node.as_slice());
    }
    Ok(nodes)
}
