//! Ethereum JSON-RPC client: blocks, storage words, EIP-1186 proofs and the
//! two token calls needed to confirm a discovered slot.

use anyhow::{bail, ensure, Context, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage_proof_core::{keccak256, rlp, StorageKey, StorageProof, StorageSource};

/// `keccak256("decimals()")[..4]`
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `keccak256("balanceOf(address)")[..4]`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Header fields added by later forks, in header order. Each is encoded only
/// when the node reports it.
const OPTIONAL_HEADER_FIELDS: [(&str, FieldKind); 6] = [
    ("baseFeePerGas", FieldKind::Quantity),
    ("withdrawalsRoot", FieldKind::Bytes),
    ("blobGasUsed", FieldKind::Quantity),
    ("excessBlobGas", FieldKind::Quantity),
    ("parentBeaconBlockRoot", FieldKind::Bytes),
    ("requestsHash", FieldKind::Bytes),
];

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Block data from `eth_getBlockByNumber`, with the hash checked against the
/// re-encoded header.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub number: u64,
    pub hash: [u8; 32],
    pub state_root: [u8; 32],
    pub header_rlp: Vec<u8>,
}

/// The parts of an `eth_getProof` response that verification needs.
#[derive(Debug, Clone)]
pub struct ProofResponse {
    pub account_proof: Vec<Vec<u8>>,
    /// Storage root as reported by the node. Only logged; the verified one
    /// comes out of the account proof.
    pub storage_hash: [u8; 32],
    pub storage_proofs: Vec<StorageProof>,
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let resp: RpcResponse = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("RPC request to {method} failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse RPC response for {method}"))?;

        if let Some(err) = resp.error {
            bail!("RPC error ({}): {}", err.code, err.message);
        }

        resp.result
            .ok_or_else(|| anyhow::anyhow!("RPC response has no result for {method}"))
    }

    /// Fetch a block header and bind its state root to the block hash.
    pub async fn block(&self, block_tag: &str) -> Result<BlockData> {
        let result = self
            .call("eth_getBlockByNumber", serde_json::json!([block_tag, false]))
            .await?;
        let block = result
            .as_object()
            .with_context(|| format!("block {block_tag} not found"))?;

        let number = parse_hex_u64(hex_field(block, "number")?)?;
        let state_root = parse_hex_bytes32(hex_field(block, "stateRoot")?).context("stateRoot")?;
        let reported = parse_hex_bytes32(hex_field(block, "hash")?).context("block hash")?;

        let header_rlp = encode_block_header(block)?;
        let hash = keccak256(&header_rlp);
        if hash != reported {
            bail!(
                "block hash mismatch: RPC says 0x{} but the header hashes to 0x{}",
                hex::encode(reported),
                hex::encode(hash)
            );
        }

        Ok(BlockData {
            number,
            hash,
            state_root,
            header_rlp,
        })
    }

    /// `eth_getStorageAt`, left-padded to a full word.
    pub async fn storage_at(
        &self,
        contract: &[u8; 20],
        slot: &StorageKey,
        block_tag: &str,
    ) -> Result<[u8; 32]> {
        let result = self
            .call(
                "eth_getStorageAt",
                serde_json::json!([to_hex(contract), to_hex(slot.as_bytes()), block_tag]),
            )
            .await?;
        let raw = parse_hex_bytes(result.as_str().context("eth_getStorageAt: expected string")?)?;
        left_pad_word(&raw).context("eth_getStorageAt: word longer than 32 bytes")
    }

    /// `eth_getProof` for `contract` with one storage proof per slot, in order.
    pub async fn proof(
        &self,
        contract: &[u8; 20],
        slots: &[StorageKey],
        block_number: u64,
    ) -> Result<ProofResponse> {
        let keys: Vec<String> = slots.iter().map(|slot| to_hex(slot.as_bytes())).collect();
        let result = self
            .call(
                "eth_getProof",
                serde_json::json!([to_hex(contract), keys, block_tag(Some(block_number))]),
            )
            .await?;
        let obj = result.as_object().context("expected proof object")?;

        let account_proof = parse_node_list(obj.get("accountProof"), "accountProof")?;
        let storage_hash = parse_hex_bytes32(hex_field(obj, "storageHash")?).context("storageHash")?;

        let entries = obj
            .get("storageProof")
            .and_then(|v| v.as_array())
            .context("missing storageProof")?;
        ensure!(
            entries.len() == slots.len(),
            "asked for {} storage proofs, got {}",
            slots.len(),
            entries.len()
        );

        // Nodes disagree on how they echo keys back, so the requested keys
        // are kept and only value and proof are taken from the response.
        let mut storage_proofs = Vec::with_capacity(slots.len());
        for (i, (slot, entry)) in slots.iter().zip(entries).enumerate() {
            let entry = entry
                .as_object()
                .with_context(|| format!("storage proof {i} is not an object"))?;
            let value = entry
                .get("value")
                .and_then(|v| v.as_str())
                .with_context(|| format!("storage proof {i} has no value"))?;
            storage_proofs.push(StorageProof {
                key: *slot,
                value: parse_hex_quantity(value)
                    .with_context(|| format!("storage proof {i} value"))?,
                proof: parse_node_list(entry.get("proof"), "storage proof")?,
            });
        }

        Ok(ProofResponse {
            account_proof,
            storage_hash,
            storage_proofs,
        })
    }

    async fn eth_call(&self, to: &[u8; 20], data: &[u8], block_tag: &str) -> Result<Vec<u8>> {
        let result = self
            .call(
                "eth_call",
                serde_json::json!([{ "to": to_hex(to), "data": to_hex(data) }, block_tag]),
            )
            .await?;
        parse_hex_bytes(result.as_str().context("eth_call: expected string")?)
    }

    /// `decimals()` of an ERC20 token.
    pub async fn decimals(&self, contract: &[u8; 20], block_tag: &str) -> Result<u32> {
        let ret = self
            .eth_call(contract, &DECIMALS_SELECTOR, block_tag)
            .await
            .context("decimals() call failed")?;
        ensure!(ret.len() == 32, "decimals() returned {} bytes", ret.len());
        ensure!(ret[..31].iter().all(|b| *b == 0), "decimals() does not fit uint8");
        Ok(u32::from(ret[31]))
    }

    /// `balanceOf(holder)` of an ERC20 token.
    pub async fn balance_of(
        &self,
        contract: &[u8; 20],
        holder: &[u8; 20],
        block_tag: &str,
    ) -> Result<BigUint> {
        let mut calldata = Vec::with_capacity(36);
        calldata.extend_from_slice(&BALANCE_OF_SELECTOR);
        calldata.extend_from_slice(&[0u8; 12]);
        calldata.extend_from_slice(holder);

        let ret = self
            .eth_call(contract, &calldata, block_tag)
            .await
            .context("balanceOf() call failed")?;
        ensure!(ret.len() == 32, "balanceOf() returned {} bytes", ret.len());
        Ok(BigUint::from_bytes_be(&ret))
    }
}

/// Storage of one contract at one block, read through `eth_getStorageAt`.
pub struct ContractStorage<'a> {
    client: &'a RpcClient,
    contract: [u8; 20],
    block_tag: String,
}

impl<'a> ContractStorage<'a> {
    pub fn new(client: &'a RpcClient, contract: [u8; 20], block_number: u64) -> Self {
        Self {
            client,
            contract,
            block_tag: block_tag(Some(block_number)),
        }
    }
}

impl StorageSource for ContractStorage<'_> {
    type Error = anyhow::Error;

    async fn storage_word(&self, slot: &StorageKey) -> Result<[u8; 32]> {
        let word = self
            .client
            .storage_at(&self.contract, slot, &self.block_tag)
            .await?;
        tracing::trace!(slot = %to_hex(slot.as_bytes()), word = %to_hex(&word), "storage read");
        Ok(word)
    }
}

// ---------------------------------------------------------------------------
// Block header RLP encoding
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum FieldKind {
    Bytes,
    Quantity,
}

/// Re-encode a JSON block header. The fifteen pre-London fields are required;
/// later fork fields follow when present.
fn encode_block_header(block: &Map<String, Value>) -> Result<Vec<u8>> {
    let base: [(&str, FieldKind); 15] = [
        ("parentHash", FieldKind::Bytes),
        ("sha3Uncles", FieldKind::Bytes),
        ("miner", FieldKind::Bytes),
        ("stateRoot", FieldKind::Bytes),
        ("transactionsRoot", FieldKind::Bytes),
        ("receiptsRoot", FieldKind::Bytes),
        ("logsBloom", FieldKind::Bytes),
        ("difficulty", FieldKind::Quantity),
        ("number", FieldKind::Quantity),
        ("gasLimit", FieldKind::Quantity),
        ("gasUsed", FieldKind::Quantity),
        ("timestamp", FieldKind::Quantity),
        ("extraData", FieldKind::Bytes),
        ("mixHash", FieldKind::Bytes),
        ("nonce", FieldKind::Bytes),
    ];

    let mut items = Vec::with_capacity(base.len() + OPTIONAL_HEADER_FIELDS.len());
    for (name, kind) in base {
        items.push(encode_field(hex_field(block, name)?, kind)?);
    }
    for (name, kind) in OPTIONAL_HEADER_FIELDS {
        if let Some(value) = block.get(name).and_then(|v| v.as_str()) {
            items.push(encode_field(value, kind)?);
        }
    }

    Ok(rlp::encode_list(&items))
}

fn encode_field(value: &str, kind: FieldKind) -> Result<Vec<u8>> {
    let bytes = match kind {
        FieldKind::Bytes => parse_hex_bytes(value)?,
        FieldKind::Quantity => parse_hex_quantity(value)?,
    };
    Ok(rlp::encode_bytes(&bytes))
}

// ---------------------------------------------------------------------------
// Hex / quantity helpers
// ---------------------------------------------------------------------------

/// The block tag for a height; absent or zero means the latest block.
pub fn block_tag(height: Option<u64>) -> String {
    match height {
        None | Some(0) => "latest".to_string(),
        Some(number) => format!("0x{number:x}"),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn strip_hex_prefix(hex_str: &str) -> &str {
    hex_str
        .strip_prefix("0x")
        .or_else(|| hex_str.strip_prefix("0X"))
        .unwrap_or(hex_str)
}

/// Parse a hex quantity into minimal big-endian bytes, at most one word
/// wide. Zero is the empty string.
pub fn parse_hex_quantity(hex_str: &str) -> Result<Vec<u8>> {
    let digits = strip_hex_prefix(hex_str).trim_start_matches('0');
    let even = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&even).with_context(|| format!("invalid hex quantity {hex_str:?}"))?;
    ensure!(bytes.len() <= 32, "hex quantity {hex_str:?} is wider than 32 bytes");
    Ok(bytes)
}

pub fn parse_hex_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let stripped = strip_hex_prefix(hex_str);
    if stripped.is_empty() {
        return Ok(Vec::new());
    }

    let padded = if stripped.len() % 2 == 1 {
        format!("0{stripped}")
    } else {
        stripped.to_string()
    };

    hex::decode(&padded).context("invalid hex string")
}

pub fn parse_hex_u64(hex_str: &str) -> Result<u64> {
    u64::from_str_radix(strip_hex_prefix(hex_str), 16).context("invalid hex u64")
}

pub fn parse_hex_bytes32(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = parse_hex_bytes(hex_str)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("expected 32 bytes, got {}", bytes.len()))
}

pub fn parse_hex_address(hex_str: &str) -> Result<[u8; 20]> {
    let stripped = strip_hex_prefix(hex_str);
    ensure!(stripped.len() == 40, "address must be 20 bytes (40 hex chars)");
    let bytes = hex::decode(stripped).context("invalid address hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("address must be 20 bytes"))
}

fn left_pad_word(raw: &[u8]) -> Option<[u8; 32]> {
    let trimmed = rlp::trim_leading_zeros(raw);
    if trimmed.len() > 32 {
        return None;
    }
    let mut word = [0u8; 32];
    word[32 - trimmed.len()..].copy_from_slice(trimmed);
    Some(word)
}

fn hex_field<'a>(obj: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    obj.get(name)
        .and_then(|v| v.as_str())
        .with_context(|| format!("missing {name}"))
}

fn parse_node_list(value: Option<&Value>, what: &str) -> Result<Vec<Vec<u8>>> {
    let nodes = value
        .and_then(|v| v.as_array())
        .with_context(|| format!("missing {what}"))?;

    let mut out = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let hex_str = node
            .as_str()
            .with_context(|| format!("{what} node {i} is not a string"))?;
        out.push(parse_hex_bytes(hex_str)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_are_minimal_big_endian() {
        assert!(parse_hex_quantity("0x0").unwrap().is_empty());
        assert!(parse_hex_quantity("0x00").unwrap().is_empty());
        assert_eq!(parse_hex_quantity("0x3e8").unwrap(), vec![0x03, 0xe8]);
        assert_eq!(parse_hex_quantity("0x000100").unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn malformed_quantities_are_errors() {
        assert!(parse_hex_quantity("0xzz").is_err());
        assert!(parse_hex_quantity("0x12g4").is_err());
        let too_wide = format!("0x1{}", "0".repeat(64));
        assert!(parse_hex_quantity(&too_wide).is_err());
    }

    #[test]
    fn block_tags() {
        assert_eq!(block_tag(None), "latest");
        assert_eq!(block_tag(Some(0)), "latest");
        assert_eq!(block_tag(Some(255)), "0xff");
    }

    #[test]
    fn selectors_match_signatures() {
        assert_eq!(keccak256(b"decimals()")[..4], DECIMALS_SELECTOR);
        assert_eq!(keccak256(b"balanceOf(address)")[..4], BALANCE_OF_SELECTOR);
    }

    #[test]
    fn addresses_must_be_twenty_bytes() {
        let addr = parse_hex_address("0x00000000000000000000000000000000000000Ff").unwrap();
        assert_eq!(addr[19], 0xff);
        assert!(parse_hex_address("0x1234").is_err());
        assert!(parse_hex_address(&format!("0x{}", "zz".repeat(20))).is_err());
    }

    #[test]
    fn storage_words_are_left_padded() {
        assert_eq!(left_pad_word(&[0x03, 0xe8]).unwrap()[30..], [0x03, 0xe8]);
        assert_eq!(left_pad_word(&[]).unwrap(), [0u8; 32]);
        let mut long = vec![0u8; 33];
        long[0] = 1;
        assert!(left_pad_word(&long).is_none());
    }

    fn mainnet_block_1() -> Map<String, Value> {
        serde_json::json!({
            "parentHash": "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
            "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
            "miner": "0x05a56e2d52c817161883f50c441c3228cfe54d9f",
            "stateRoot": "0xd67e4d450343046425ae4271474353857ab860dbc0a1dde64b41b5cd3a532bf3",
            "transactionsRoot": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
            "receiptsRoot": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "difficulty": "0x3ff800000",
            "number": "0x1",
            "gasLimit": "0x1388",
            "gasUsed": "0x0",
            "timestamp": "0x55ba4224",
            "extraData": "0x476574682f76312e302e302f6c696e75782f676f312e342e32",
            "mixHash": "0x969b900de27b6ac6a67742365dd65f55a0526c41fd18e1b16f1a1215c2e66f59",
            "nonce": "0x539bd4979fef1ec4",
            "hash": "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn frontier_header_hashes_to_block_hash() {
        let block = mainnet_block_1();
        let header = encode_block_header(&block).unwrap();
        assert_eq!(
            to_hex(&keccak256(&header)),
            "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6"
        );
    }

    #[test]
    fn missing_required_header_field_is_an_error() {
        let mut block = mainnet_block_1();
        block.remove("receiptsRoot");
        assert!(encode_block_header(&block).is_err());
    }

    #[test]
    fn later_fork_fields_are_appended_in_order() {
        let mut block = mainnet_block_1();
        let frontier = encode_block_header(&block).unwrap();
        block.insert("baseFeePerGas".into(), "0x7".into());
        let london = encode_block_header(&block).unwrap();
        assert_ne!(frontier, london);
        assert_eq!(*london.last().unwrap(), 0x07);
    }
}
