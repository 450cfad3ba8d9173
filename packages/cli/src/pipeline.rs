//! Discovery and proof collection against a live node.

use anyhow::{anyhow, bail, Context, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use storage_proof_core::{
    array_element_slot, discover, holder_mapping_slot, resolve, Balance, BalanceProof,
    CheckpointLayout, CheckpointReadError, DiscoveredSlot, LayoutKind, ProbeConfig,
    StorageCheckpoints, TokenBalanceClaim,
};

use crate::rpc::{block_tag, to_hex, BlockData, ContractStorage, RpcClient};

/// Result of looking for a holder's balance slot.
#[derive(Debug)]
pub enum Discovery {
    Found(DiscoveredSlot),
    /// `balanceOf` is zero, so there is nothing to match slots against.
    NoBalance,
    /// No probed slot holds the reference balance.
    NotFound { reference: BigUint },
}

/// Probe `config.slot_range` for the slot holding `holder`'s `balanceOf`
/// at `config.target_block`.
pub async fn discover_slot(
    client: &RpcClient,
    contract: [u8; 20],
    holder: [u8; 20],
    config: &ProbeConfig,
) -> Result<Discovery> {
    let reference = client
        .balance_of(&contract, &holder, &block_tag(Some(config.target_block)))
        .await?;
    tracing::info!(
        contract = %to_hex(&contract),
        holder = %to_hex(&holder),
        balance = %reference,
        "reference balance"
    );

    if reference.is_zero() {
        tracing::info!("no amount for holder");
        return Ok(Discovery::NoBalance);
    }

    let storage = ContractStorage::new(client, contract, config.target_block);
    match discover(&storage, &holder, &reference, config).await? {
        Some(slot) => {
            tracing::info!(
                layout = %slot.layout,
                slot = slot.index,
                checkpoint = ?slot.checkpoint_index,
                "balance slot found"
            );
            Ok(Discovery::Found(slot))
        }
        None => {
            tracing::warn!(
                from = config.slot_range.start,
                to = config.slot_range.end,
                "no slot in range holds the reference balance"
            );
            Ok(Discovery::NotFound { reference })
        }
    }
}

/// Read the balance at a slot given on the command line instead of probing.
pub async fn read_slot(
    client: &RpcClient,
    contract: [u8; 20],
    holder: [u8; 20],
    layout: LayoutKind,
    index: u64,
    checkpoint_layout: CheckpointLayout,
    block_number: u64,
) -> Result<DiscoveredSlot> {
    match layout {
        LayoutKind::Mapping => {
            let slot = holder_mapping_slot(&holder, index);
            let word = client
                .storage_at(&contract, &slot, &block_tag(Some(block_number)))
                .await?;
            let balance = Balance::decode(&word, 0)?;
            Ok(DiscoveredSlot {
                layout,
                index,
                balance: balance.magnitude().clone(),
                checkpoint_index: None,
            })
        }
        LayoutKind::Checkpoint => {
            let storage = ContractStorage::new(client, contract, block_number);
            let mut checkpoints = StorageCheckpoints::new(&storage, &holder, index, checkpoint_layout);
            let resolved = resolve(&mut checkpoints, block_number)
                .await
                .map_err(|err| match err {
                    CheckpointReadError::Source(err) => err,
                    CheckpointReadError::Decode(err) => {
                        anyhow!(err).context(format!("slot {index} is not a checkpoint array"))
                    }
                })?;
            tracing::debug!(count = resolved.count, "checkpoint array read");

            let Some((checkpoint_index, checkpoint)) = resolved.entry else {
                bail!("holder has no checkpoint at or before block {block_number}");
            };
            Ok(DiscoveredSlot {
                layout,
                index,
                balance: checkpoint.value,
                checkpoint_index: Some(checkpoint_index),
            })
        }
    }
}

/// Fetch the account and storage proofs for `slot` and assemble a claim
/// against the block's state root.
pub async fn collect_claim(
    client: &RpcClient,
    contract: [u8; 20],
    holder: [u8; 20],
    block: &BlockData,
    decimals: u32,
    slot: &DiscoveredSlot,
    checkpoint_layout: CheckpointLayout,
) -> Result<TokenBalanceClaim> {
    let holder_slot = holder_mapping_slot(&holder, slot.index);
    let keys = match slot.layout {
        LayoutKind::Mapping => vec![holder_slot],
        LayoutKind::Checkpoint => {
            let index = slot
                .checkpoint_index
                .context("checkpoint slot without a checkpoint index")?;
            let next = index.checked_add(1).context("checkpoint index overflows")?;
            vec![
                array_element_slot(&holder_slot, index),
                array_element_slot(&holder_slot, next),
            ]
        }
    };

    let response = client
        .proof(&contract, &keys, block.number)
        .await
        .context("eth_getProof failed")?;
    tracing::debug!(
        account_nodes = response.account_proof.len(),
        storage_hash = %to_hex(&response.storage_hash),
        "proof fetched"
    );

    let mut storage_proofs = response.storage_proofs.into_iter();
    let balance_proof = match slot.layout {
        LayoutKind::Mapping => BalanceProof::Mapping {
            slot: storage_proofs.next().context("missing storage proof")?,
        },
        LayoutKind::Checkpoint => BalanceProof::Checkpoint {
            layout: checkpoint_layout,
            index: slot.checkpoint_index.context("missing checkpoint index")?,
            checkpoint: storage_proofs.next().context("missing checkpoint proof")?,
            next: storage_proofs.next().context("missing next checkpoint proof")?,
        },
    };

    Ok(TokenBalanceClaim {
        contract,
        holder,
        block_number: block.number,
        state_root: block.state_root,
        decimals,
        slot_index: slot.index,
        account_proof: response.account_proof,
        balance_proof,
    })
}
