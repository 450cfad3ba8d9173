//! Merkle-Patricia trie nodes and their wire form.

use alloc::vec::Vec;

use crate::{
    keccak256,
    rlp::{self, RlpItem},
    ProofError,
};

/// The length of the branch list when RLP encoded.
const BRANCH_LIST_LENGTH: usize = 17;

/// The length of a leaf or extension node's RLP encoded list.
const LEAF_OR_EXTENSION_LIST_LENGTH: usize = 2;

/// Hex-prefix flag bit marking a leaf path.
const FLAG_LEAF: u8 = 0x2;

/// Hex-prefix flag bit marking an odd number of nibbles.
const FLAG_ODD: u8 = 0x1;

/// How a parent points at a child node.
///
/// Nodes whose encoding is shorter than 32 bytes are embedded in the parent
/// instead of being referenced by hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NodeRef {
    #[default]
    Empty,
    Inline(Vec<u8>),
    Hash([u8; 32]),
}

impl NodeRef {
    /// The reference a parent must hold for a node with this encoding.
    pub fn from_encoded(encoded: &[u8]) -> Self {
        if encoded.len() < 32 {
            NodeRef::Inline(encoded.to_vec())
        } else {
            NodeRef::Hash(keccak256(encoded))
        }
    }

    fn from_item(item: &RlpItem<'_>) -> Result<Self, ProofError> {
        if item.is_list() {
            if item.raw().len() >= 32 {
                return Err(ProofError::MalformedNode);
            }
            return Ok(NodeRef::Inline(item.raw().to_vec()));
        }

        let bytes = item.bytes()?;
        match bytes.len() {
            0 => Ok(NodeRef::Empty),
            32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(bytes);
                Ok(NodeRef::Hash(hash))
            }
            _ => Err(ProofError::MalformedNode),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeRef::Empty)
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            NodeRef::Empty => rlp::encode_bytes(&[]),
            NodeRef::Inline(raw) => raw.clone(),
            NodeRef::Hash(hash) => rlp::encode_bytes(hash),
        }
    }
}

/// A decoded trie node. Paths are stored as nibbles with the hex-prefix
/// flag already stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    Branch {
        children: [NodeRef; 16],
        value: Option<Vec<u8>>,
    },
    Extension {
        path: Vec<u8>,
        child: NodeRef,
    },
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
}

impl TrieNode {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProofError> {
        let item = RlpItem::decode(bytes)?;
        if !item.is_list() {
            return Err(ProofError::MalformedNode);
        }
        let items = item.items()?;

        match items.len() {
            BRANCH_LIST_LENGTH => {
                let mut children: [NodeRef; 16] = Default::default();
                for (child, item) in children.iter_mut().zip(&items[..16]) {
                    *child = NodeRef::from_item(item)?;
                }
                let value = items[16]
                    .bytes()
                    .map_err(|_| ProofError::MalformedNode)?;
                Ok(TrieNode::Branch {
                    children,
                    value: (!value.is_empty()).then(|| value.to_vec()),
                })
            }
            LEAF_OR_EXTENSION_LIST_LENGTH => {
                let encoded_path = items[0]
                    .bytes()
                    .map_err(|_| ProofError::MalformedNode)?;
                let (is_leaf, path) = decode_hex_prefix(encoded_path)?;

                if is_leaf {
                    let value = items[1]
                        .bytes()
                        .map_err(|_| ProofError::MalformedNode)?;
                    return Ok(TrieNode::Leaf {
                        path,
                        value: value.to_vec(),
                    });
                }

                // An extension must make progress and point somewhere.
                let child = NodeRef::from_item(&items[1])?;
                if path.is_empty() || child.is_empty() {
                    return Err(ProofError::MalformedNode);
                }
                Ok(TrieNode::Extension { path, child })
            }
            _ => Err(ProofError::MalformedNode),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Branch { children, value } => {
                let mut items: Vec<Vec<u8>> = children.iter().map(NodeRef::encode).collect();
                items.push(rlp::encode_bytes(value.as_deref().unwrap_or_default()));
                rlp::encode_list(&items)
            }
            TrieNode::Extension { path, child } => rlp::encode_list(&[
                rlp::encode_bytes(&encode_hex_prefix(path, false)),
                child.encode(),
            ]),
            TrieNode::Leaf { path, value } => rlp::encode_list(&[
                rlp::encode_bytes(&encode_hex_prefix(path, true)),
                rlp::encode_bytes(value),
            ]),
        }
    }

    /// The reference a parent holds for this node.
    pub fn reference(&self) -> NodeRef {
        NodeRef::from_encoded(&self.encode())
    }
}

/// Split bytes into high/low nibbles.
pub fn to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(b >> 4);
        out.push(b & 0x0f);
    }
    out
}

/// Decode a hex-prefix path into `(is_leaf, nibbles)`.
pub fn decode_hex_prefix(encoded: &[u8]) -> Result<(bool, Vec<u8>), ProofError> {
    let first = *encoded.first().ok_or(ProofError::MalformedNode)?;

    let flag = first >> 4;
    if flag > (FLAG_LEAF | FLAG_ODD) {
        return Err(ProofError::MalformedNode);
    }
    let is_leaf = flag & FLAG_LEAF != 0;
    let is_odd = flag & FLAG_ODD != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(ProofError::MalformedNode);
    }
    nibbles.extend(to_nibbles(&encoded[1..]));

    Ok((is_leaf, nibbles))
}

pub fn encode_hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { FLAG_LEAF << 4 } else { 0 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);

    let rest = if nibbles.len() % 2 == 1 {
        out.push(flag | (FLAG_ODD << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}
