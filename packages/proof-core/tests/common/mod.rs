//! Test fixtures: a small in-memory trie builder and storage fakes.

#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::{BTreeMap, HashMap},
};

use num_bigint::BigUint;
use storage_proof_core::{
    keccak256,
    node::to_nibbles,
    rlp::{self, trim_leading_zeros},
    Checkpoint, CheckpointLayout, CheckpointSource, NodeRef, ProofError, StorageKey,
    StorageProof, StorageSource, TrieNode, EMPTY_TRIE_ROOT,
};

/// A trie built bottom-up from its full contents.
pub struct Trie {
    pub root: [u8; 32],
    nodes: BTreeMap<[u8; 32], Vec<u8>>,
}

impl Trie {
    pub fn build(entries: &[([u8; 32], Vec<u8>)]) -> Self {
        let mut trie = Trie {
            root: EMPTY_TRIE_ROOT,
            nodes: BTreeMap::new(),
        };
        if entries.is_empty() {
            return trie;
        }

        let paths: Vec<(Vec<u8>, Vec<u8>)> = entries
            .iter()
            .map(|(key, value)| (to_nibbles(key), value.clone()))
            .collect();
        let root = trie.insert(&paths).encode();
        trie.root = keccak256(&root);
        trie.nodes.insert(trie.root, root);
        trie
    }

    fn insert(&mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> TrieNode {
        if let [(path, value)] = entries {
            return TrieNode::Leaf {
                path: path.clone(),
                value: value.clone(),
            };
        }

        let shared = common_prefix(entries);
        if shared > 0 {
            let rest: Vec<_> = entries
                .iter()
                .map(|(path, value)| (path[shared..].to_vec(), value.clone()))
                .collect();
            let child = self.insert(&rest);
            return TrieNode::Extension {
                path: entries[0].0[..shared].to_vec(),
                child: self.reference(&child),
            };
        }

        let mut children: [NodeRef; 16] = Default::default();
        for (nibble, slot) in children.iter_mut().enumerate() {
            let group: Vec<_> = entries
                .iter()
                .filter(|(path, _)| path[0] as usize == nibble)
                .map(|(path, value)| (path[1..].to_vec(), value.clone()))
                .collect();
            if !group.is_empty() {
                let child = self.insert(&group);
                *slot = self.reference(&child);
            }
        }
        TrieNode::Branch {
            children,
            value: None,
        }
    }

    fn reference(&mut self, node: &TrieNode) -> NodeRef {
        let reference = node.reference();
        if let NodeRef::Hash(hash) = reference {
            self.nodes.insert(hash, node.encode());
        }
        reference
    }

    /// The hashed nodes on the path to `key`, root first.
    pub fn proof(&self, key: &[u8; 32]) -> Vec<Vec<u8>> {
        let nibbles = to_nibbles(key);
        let mut proof = Vec::new();
        let mut cursor = 0;
        let mut current = NodeRef::Hash(self.root);

        loop {
            let encoded = match &current {
                NodeRef::Empty => break,
                NodeRef::Inline(raw) => raw.clone(),
                NodeRef::Hash(hash) => match self.nodes.get(hash) {
                    Some(encoded) => {
                        proof.push(encoded.clone());
                        encoded.clone()
                    }
                    None => break,
                },
            };

            match TrieNode::decode(&encoded).unwrap() {
                TrieNode::Branch { children, .. } => {
                    if cursor == nibbles.len() {
                        break;
                    }
                    current = children[nibbles[cursor] as usize].clone();
                    cursor += 1;
                }
                TrieNode::Extension { path, child } => {
                    if !nibbles[cursor..].starts_with(&path) {
                        break;
                    }
                    cursor += path.len();
                    current = child;
                }
                TrieNode::Leaf { .. } => break,
            }
        }
        proof
    }
}

fn common_prefix(entries: &[(Vec<u8>, Vec<u8>)]) -> usize {
    let first = &entries[0].0;
    entries[1..]
        .iter()
        .map(|(path, _)| first.iter().zip(path).take_while(|(a, b)| a == b).count())
        .min()
        .unwrap_or(first.len())
}

pub fn word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

pub fn minime_word(from_block: u64, value: u64) -> [u8; 32] {
    CheckpointLayout::MINIME
        .pack(&Checkpoint {
            from_block,
            value: BigUint::from(value),
        })
        .unwrap()
}

/// Contract storage held in memory. Counts reads.
#[derive(Default)]
pub struct MemoryStorage {
    words: HashMap<StorageKey, [u8; 32]>,
    reads: Cell<usize>,
}

impl MemoryStorage {
    pub fn set(&mut self, slot: StorageKey, word: [u8; 32]) {
        self.words.insert(slot, word);
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// The storage trie committing to the non-zero words.
    pub fn trie(&self) -> Trie {
        let entries: Vec<_> = self
            .words
            .iter()
            .filter(|(_, word)| word.iter().any(|b| *b != 0))
            .map(|(slot, word)| (slot.trie_key(), rlp::encode_bytes(trim_leading_zeros(word))))
            .collect();
        Trie::build(&entries)
    }

    /// An EIP-1186 style storage proof for `slot`.
    pub fn storage_proof(&self, trie: &Trie, slot: StorageKey) -> StorageProof {
        let word = self.words.get(&slot).copied().unwrap_or_default();
        StorageProof {
            key: slot,
            value: trim_leading_zeros(&word).to_vec(),
            proof: trie.proof(&slot.trie_key()),
        }
    }
}

impl StorageSource for MemoryStorage {
    type Error = ProofError;

    async fn storage_word(&self, slot: &StorageKey) -> Result<[u8; 32], ProofError> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.words.get(slot).copied().unwrap_or_default())
    }
}

/// Checkpoints given directly, counting fetches.
pub struct VecCheckpoints {
    pub entries: Vec<Checkpoint>,
    pub fetches: usize,
}

impl VecCheckpoints {
    pub fn new(entries: &[(u64, u64)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|&(from_block, value)| Checkpoint {
                    from_block,
                    value: BigUint::from(value),
                })
                .collect(),
            fetches: 0,
        }
    }
}

impl CheckpointSource for VecCheckpoints {
    type Error = ProofError;

    async fn count(&mut self) -> Result<u64, ProofError> {
        Ok(self.entries.len() as u64)
    }

    async fn checkpoint(&mut self, index: u64) -> Result<Checkpoint, ProofError> {
        self.fetches += 1;
        self.entries
            .get(index as usize)
            .cloned()
            .ok_or(ProofError::ProofIncomplete)
    }
}
