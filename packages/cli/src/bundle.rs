//! Self-contained proof bundle files.
//!
//! ```json
//! {
//!   "version": "v1",
//!   "contract": "0x...", "holder": "0x...",
//!   "blockNumber": 19000000, "blockHash": "0x...", "blockHeader": "0x...",
//!   "stateRoot": "0x...", "decimals": 18,
//!   "layout": "mapping", "slotIndex": 0,
//!   "accountProof": ["0x..."],
//!   "storageProofs": [{ "key": "0x...", "value": "0x...", "proof": ["0x..."] }],
//!   "commitment": "0x..."
//! }
//! ```
//!
//! Checkpoint bundles also carry `checkpointIndex` and `checkpointBlockBits`
//! and hold two storage proofs: the checkpoint and the slot after it.

use std::{fs, path::Path};

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use storage_proof_core::{
    keccak256, rlp::RlpItem, BalanceProof, CheckpointLayout, LayoutKind, StorageKey,
    StorageProof, TokenBalanceClaim,
};

use crate::rpc::{parse_hex_address, parse_hex_bytes, parse_hex_bytes32, to_hex, BlockData};

pub const BUNDLE_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub version: String,
    pub contract: String,
    pub holder: String,
    pub block_number: u64,
    pub block_hash: String,
    /// RLP of the block header; binds `stateRoot` to `blockHash`.
    pub block_header: String,
    pub state_root: String,
    pub decimals: u32,
    pub layout: LayoutKind,
    pub slot_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_block_bits: Option<u32>,
    pub account_proof: Vec<String>,
    pub storage_proofs: Vec<StorageProofEntry>,
    /// SHA-256 over every proof node, length-prefixed.
    pub commitment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProofEntry {
    pub key: String,
    pub value: String,
    pub proof: Vec<String>,
}

impl StorageProofEntry {
    fn from_proof(proof: &StorageProof) -> Self {
        Self {
            key: to_hex(proof.key.as_bytes()),
            value: to_hex(&proof.value),
            proof: proof.proof.iter().map(|node| to_hex(node)).collect(),
        }
    }

    fn to_proof(&self) -> Result<StorageProof> {
        Ok(StorageProof {
            key: StorageKey(parse_hex_bytes32(&self.key).context("storage key")?),
            value: parse_hex_bytes(&self.value).context("storage value")?,
            proof: parse_nodes(&self.proof)?,
        })
    }
}

impl ProofBundle {
    pub fn new(block: &BlockData, claim: &TokenBalanceClaim) -> Self {
        let (layout, checkpoint_index, checkpoint_block_bits, storage_proofs) =
            match &claim.balance_proof {
                BalanceProof::Mapping { slot } => (LayoutKind::Mapping, None, None, vec![slot]),
                BalanceProof::Checkpoint {
                    layout,
                    index,
                    checkpoint,
                    next,
                } => (
                    LayoutKind::Checkpoint,
                    Some(*index),
                    Some(layout.block_bits()),
                    vec![checkpoint, next],
                ),
            };

        Self {
            version: BUNDLE_VERSION.to_string(),
            contract: to_hex(&claim.contract),
            holder: to_hex(&claim.holder),
            block_number: claim.block_number,
            block_hash: to_hex(&block.hash),
            block_header: to_hex(&block.header_rlp),
            state_root: to_hex(&claim.state_root),
            decimals: claim.decimals,
            layout,
            slot_index: claim.slot_index,
            checkpoint_index,
            checkpoint_block_bits,
            account_proof: claim.account_proof.iter().map(|node| to_hex(node)).collect(),
            storage_proofs: storage_proofs
                .into_iter()
                .map(StorageProofEntry::from_proof)
                .collect(),
            commitment: to_hex(&compute_commitment(
                claim.account_proof.iter().chain(storage_proofs_nodes(&claim.balance_proof)),
            )),
        }
    }

    /// Rebuild the claim, checking that the header hashes to the block hash
    /// and commits to the recorded state root and block number.
    ///
    /// The checkpoint word split is not covered by any proof, so it comes
    /// from the verifier; a bundle recording a different split is refused.
    pub fn to_claim(&self, checkpoint_layout: CheckpointLayout) -> Result<TokenBalanceClaim> {
        let block_hash = parse_hex_bytes32(&self.block_hash).context("blockHash")?;
        let header = parse_hex_bytes(&self.block_header).context("blockHeader")?;
        let state_root = parse_hex_bytes32(&self.state_root).context("stateRoot")?;
        check_header(&header, &block_hash, &state_root, self.block_number)?;

        let mut storage_proofs = self
            .storage_proofs
            .iter()
            .map(StorageProofEntry::to_proof)
            .collect::<Result<Vec<_>>>()?
            .into_iter();

        let balance_proof = match self.layout {
            LayoutKind::Mapping => {
                ensure!(self.storage_proofs.len() == 1, "mapping bundle needs one storage proof");
                BalanceProof::Mapping {
                    slot: storage_proofs.next().context("missing storage proof")?,
                }
            }
            LayoutKind::Checkpoint => {
                ensure!(
                    self.storage_proofs.len() == 2,
                    "checkpoint bundle needs two storage proofs"
                );
                let bits = self.checkpoint_block_bits.context("missing checkpointBlockBits")?;
                ensure!(
                    bits == checkpoint_layout.block_bits(),
                    "bundle records checkpointBlockBits {bits} but verification uses {}; \
                     pass --checkpoint-block-bits {bits} to accept it",
                    checkpoint_layout.block_bits()
                );
                BalanceProof::Checkpoint {
                    layout: checkpoint_layout,
                    index: self.checkpoint_index.context("missing checkpointIndex")?,
                    checkpoint: storage_proofs.next().context("missing checkpoint proof")?,
                    next: storage_proofs.next().context("missing next checkpoint proof")?,
                }
            }
        };

        Ok(TokenBalanceClaim {
            contract: parse_hex_address(&self.contract).context("contract")?,
            holder: parse_hex_address(&self.holder).context("holder")?,
            block_number: self.block_number,
            state_root,
            decimals: self.decimals,
            slot_index: self.slot_index,
            account_proof: parse_nodes(&self.account_proof)?,
            balance_proof,
        })
    }

    fn recompute_commitment(&self) -> Result<[u8; 32]> {
        let mut nodes = parse_nodes(&self.account_proof)?;
        for entry in &self.storage_proofs {
            nodes.extend(parse_nodes(&entry.proof)?);
        }
        Ok(compute_commitment(nodes.iter()))
    }
}

fn storage_proofs_nodes(proof: &BalanceProof) -> impl Iterator<Item = &Vec<u8>> {
    let proofs = match proof {
        BalanceProof::Mapping { slot } => vec![slot],
        BalanceProof::Checkpoint {
            checkpoint, next, ..
        } => vec![checkpoint, next],
    };
    proofs.into_iter().flat_map(|proof| proof.proof.iter())
}

/// SHA-256 over `len_be_u32 || node` for every node in order.
pub fn compute_commitment<'a>(nodes: impl Iterator<Item = &'a Vec<u8>>) -> [u8; 32] {
    let mut h = Sha256::new();
    for node in nodes {
        h.update((node.len() as u32).to_be_bytes());
        h.update(node.as_slice());
    }
    let out = h.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

fn check_header(header: &[u8], block_hash: &[u8; 32], state_root: &[u8; 32], number: u64) -> Result<()> {
    ensure!(
        keccak256(header) == *block_hash,
        "block header does not hash to {}",
        to_hex(block_hash)
    );

    let fields = RlpItem::decode(header)
        .and_then(|item| item.items())
        .context("block header is not an RLP list")?;
    ensure!(fields.len() >= 15, "block header has {} fields", fields.len());

    let header_root = fields[3].bytes().context("header stateRoot")?;
    ensure!(
        header_root == state_root,
        "stateRoot {} is not the one in the block header",
        to_hex(state_root)
    );

    let header_number = fields[8].bytes().context("header number")?;
    let mut be = [0u8; 8];
    ensure!(header_number.len() <= 8, "header number too large");
    be[8 - header_number.len()..].copy_from_slice(header_number);
    ensure!(
        u64::from_be_bytes(be) == number,
        "blockNumber {number} is not the one in the block header"
    );
    Ok(())
}

fn parse_nodes(nodes: &[String]) -> Result<Vec<Vec<u8>>> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| parse_hex_bytes(node).with_context(|| format!("proof node {i}")))
        .collect()
}

/// Load a bundle file and check its version and commitment.
pub fn load_bundle(path: &Path) -> Result<ProofBundle> {
    let raw = fs::read(path).with_context(|| format!("failed reading bundle {}", path.display()))?;
    let bundle: ProofBundle = serde_json::from_slice(&raw)
        .with_context(|| format!("failed parsing bundle JSON {}", path.display()))?;

    if bundle.version != BUNDLE_VERSION {
        bail!(
            "unsupported bundle version: {} (expected {BUNDLE_VERSION})",
            bundle.version
        );
    }

    let commitment = to_hex(&bundle.recompute_commitment()?);
    if !commitment.eq_ignore_ascii_case(&bundle.commitment) {
        bail!(
            "bundle commitment mismatch: file says {} but proof nodes hash to {commitment}",
            bundle.commitment
        );
    }

    Ok(bundle)
}

pub fn save_bundle(path: &Path, bundle: &ProofBundle) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating parent dir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(bundle).context("failed serializing bundle")?;
    fs::write(path, json).with_context(|| format!("failed writing bundle {}", path.display()))
}
