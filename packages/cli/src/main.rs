use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use storage_proof_core::{
    verify_token_balance, BalanceProof, DiscoveredSlot, LayoutKind, ProbeConfig,
    TokenBalanceClaim, TokenVerification,
};

mod bundle;
mod config;
mod pipeline;
mod rpc;

use bundle::{load_bundle, save_bundle, ProofBundle};
use config::{ProbeArgs, TargetArgs};
use pipeline::Discovery;
use rpc::{block_tag, to_hex, RpcClient};

#[derive(Debug, Parser)]
#[command(name = "storage-proof")]
#[command(about = "Discover, prove and verify ERC20 balances against Ethereum state roots")]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find the storage slot that holds a holder's balance.
    Discover {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Fetch a storage proof of a holder's balance and verify it.
    Prove {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        probe: ProbeArgs,
        /// Declaration slot of the balance mapping; skips probing.
        /// Needs --layout mapping or --layout checkpoint.
        #[arg(long)]
        slot: Option<u64>,
        /// Write a proof bundle for offline verification.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify a proof bundle without network access.
    Verify {
        #[arg(long)]
        bundle: PathBuf,
        /// Bits of a checkpoint word holding the block number. Must match the
        /// bundle; the split is not covered by the proof.
        #[arg(long, default_value_t = 128)]
        checkpoint_block_bits: u32,
    },
}

/// How a command ended, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Verified,
    /// Discovery succeeded, or there was no balance to look for.
    Done,
    LayoutNotFound,
    Rejected,
}

impl Outcome {
    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Verified | Outcome::Done => ExitCode::SUCCESS,
            Outcome::LayoutNotFound => ExitCode::from(2),
            Outcome::Rejected => ExitCode::from(3),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_proof=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Command::Discover { target, probe } => cmd_discover(&target, &probe, json).await,
        Command::Prove {
            target,
            probe,
            slot,
            out,
        } => cmd_prove(&target, &probe, slot, out.as_deref(), json).await,
        Command::Verify {
            bundle,
            checkpoint_block_bits,
        } => cmd_verify(&bundle, checkpoint_block_bits, json),
    };

    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_discover(target: &TargetArgs, probe: &ProbeArgs, json: bool) -> Result<Outcome> {
    let client = RpcClient::new(target.rpc_url.clone());
    let block = client.block(&target.block_tag()).await?;
    tracing::info!(number = block.number, hash = %to_hex(&block.hash), "block header verified");

    let config = probe.probe_config(block.number)?;
    let discovery = pipeline::discover_slot(&client, target.contract, target.holder, &config).await?;

    report_discovery(target, block.number, &discovery, &config, json)?;

    Ok(match discovery {
        Discovery::NotFound { .. } => Outcome::LayoutNotFound,
        _ => Outcome::Done,
    })
}

async fn cmd_prove(
    target: &TargetArgs,
    probe: &ProbeArgs,
    slot: Option<u64>,
    out: Option<&Path>,
    json: bool,
) -> Result<Outcome> {
    let client = RpcClient::new(target.rpc_url.clone());
    let block = client.block(&target.block_tag()).await?;
    tracing::info!(number = block.number, hash = %to_hex(&block.hash), "block header verified");

    let decimals = client
        .decimals(&target.contract, &block_tag(Some(block.number)))
        .await?;
    if decimals == 0 {
        bail!("token decimals cannot be fetched (decimals() returned 0)");
    }

    let checkpoint_layout = probe.checkpoint_layout()?;
    let discovered = match slot {
        Some(index) => {
            let layout = probe
                .layout
                .kind()
                .context("--slot needs --layout mapping or --layout checkpoint")?;
            pipeline::read_slot(
                &client,
                target.contract,
                target.holder,
                layout,
                index,
                checkpoint_layout,
                block.number,
            )
            .await?
        }
        None => {
            let config = probe.probe_config(block.number)?;
            match pipeline::discover_slot(&client, target.contract, target.holder, &config).await? {
                Discovery::Found(slot) => slot,
                discovery => {
                    report_discovery(target, block.number, &discovery, &config, json)?;
                    return Ok(match discovery {
                        Discovery::NotFound { .. } => Outcome::LayoutNotFound,
                        _ => Outcome::Done,
                    });
                }
            }
        }
    };

    let claim = pipeline::collect_claim(
        &client,
        target.contract,
        target.holder,
        &block,
        decimals,
        &discovered,
        checkpoint_layout,
    )
    .await?;
    let verification = verify_token_balance(&claim);

    if let TokenVerification::Verified { balance, .. } = &verification {
        if balance.magnitude() != &discovered.balance {
            tracing::warn!(
                proven = %balance.magnitude(),
                read = %discovered.balance,
                "proven balance differs from the storage read"
            );
        }
    }

    if let Some(path) = out {
        if verification.is_verified() {
            save_bundle(path, &ProofBundle::new(&block, &claim))?;
            tracing::info!(path = %path.display(), "proof bundle written");
        } else {
            tracing::warn!(path = %path.display(), "proof rejected; bundle not written");
        }
    }

    report_verification(&claim, &block.hash, &verification, json)
}

fn cmd_verify(path: &Path, checkpoint_block_bits: u32, json: bool) -> Result<Outcome> {
    let checkpoint_layout = config::checkpoint_layout(checkpoint_block_bits)?;
    let bundle = load_bundle(path)?;
    let claim = bundle.to_claim(checkpoint_layout)?;
    tracing::info!(
        path = %path.display(),
        block = claim.block_number,
        "bundle loaded; header binds state root to block hash"
    );

    let block_hash = rpc::parse_hex_bytes32(&bundle.block_hash)?;
    let verification = verify_token_balance(&claim);
    report_verification(&claim, &block_hash, &verification, json)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotReport {
    layout: LayoutKind,
    slot_index: u64,
    balance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_index: Option<u64>,
}

impl SlotReport {
    fn new(slot: &DiscoveredSlot) -> Self {
        Self {
            layout: slot.layout,
            slot_index: slot.index,
            balance: slot.balance.to_string(),
            checkpoint_index: slot.checkpoint_index,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverReport {
    contract: String,
    holder: String,
    block_number: u64,
    found: bool,
    slot: Option<SlotReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerificationReport {
    status: &'static str,
    contract: String,
    holder: String,
    block_number: u64,
    block_hash: String,
    layout: LayoutKind,
    slot_index: u64,
    decimals: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_block_bits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

fn report_verification(
    claim: &TokenBalanceClaim,
    block_hash: &[u8; 32],
    verification: &TokenVerification,
    json: bool,
) -> Result<Outcome> {
    let (layout, checkpoint_block_bits) = match &claim.balance_proof {
        BalanceProof::Mapping { .. } => (LayoutKind::Mapping, None),
        BalanceProof::Checkpoint { layout, .. } => {
            (LayoutKind::Checkpoint, Some(layout.block_bits()))
        }
    };
    let mut report = VerificationReport {
        status: "verified",
        contract: to_hex(&claim.contract),
        holder: to_hex(&claim.holder),
        block_number: claim.block_number,
        block_hash: to_hex(block_hash),
        layout,
        slot_index: claim.slot_index,
        decimals: claim.decimals,
        checkpoint_block_bits,
        balance: None,
        raw_balance: None,
        storage_root: None,
        checkpoint_block: None,
        error: None,
        reason: None,
    };

    let outcome = match verification {
        TokenVerification::Verified {
            balance,
            storage_root,
            checkpoint_block,
        } => {
            report.balance = Some(balance.to_decimal_string());
            report.raw_balance = Some(balance.magnitude().to_string());
            report.storage_root = Some(to_hex(storage_root));
            report.checkpoint_block = *checkpoint_block;
            Outcome::Verified
        }
        TokenVerification::Rejected(err) => {
            report.status = "rejected";
            report.error = Some(err.code());
            report.reason = Some(err.as_str());
            Outcome::Rejected
        }
    };

    if json {
        print_json(&report)?;
        return Ok(outcome);
    }

    println!(
        "{}: {} of {} at block {} ({})",
        report.status, report.holder, report.contract, report.block_number, report.block_hash
    );
    match report.checkpoint_block_bits {
        Some(bits) => println!(
            "layout: {} slot {} (block in low {bits} bits, value in high {})",
            report.layout,
            report.slot_index,
            256 - bits
        ),
        None => println!("layout: {} slot {}", report.layout, report.slot_index),
    }
    match verification {
        TokenVerification::Verified { balance, .. } => {
            println!(
                "balance: {balance} (raw {}, {} decimals)",
                balance.magnitude(),
                balance.decimals()
            );
            if let Some(block) = report.checkpoint_block {
                println!("checkpoint from block: {block}");
            }
            if let Some(root) = &report.storage_root {
                println!("storage root: {root}");
            }
        }
        TokenVerification::Rejected(err) => println!("reason: {} ({})", err, err.code()),
    }
    Ok(outcome)
}

fn report_discovery(
    target: &TargetArgs,
    block_number: u64,
    discovery: &Discovery,
    config: &ProbeConfig,
    json: bool,
) -> Result<()> {
    if json {
        return print_json(&DiscoverReport {
            contract: to_hex(&target.contract),
            holder: to_hex(&target.holder),
            block_number,
            found: matches!(discovery, Discovery::Found(_)),
            slot: match discovery {
                Discovery::Found(slot) => Some(SlotReport::new(slot)),
                _ => None,
            },
        });
    }

    match discovery {
        Discovery::Found(slot) => print_slot(slot),
        Discovery::NoBalance => println!("holder has no balance at block {block_number}"),
        Discovery::NotFound { reference } => println!(
            "no {} slot in {}..{} holds balance {reference}",
            describe_layouts(&config.layouts),
            config.slot_range.start,
            config.slot_range.end
        ),
    }
    Ok(())
}

fn print_slot(slot: &DiscoveredSlot) {
    println!("layout: {}", slot.layout);
    println!("slot: {}", slot.index);
    if let Some(index) = slot.checkpoint_index {
        println!("checkpoint: {index}");
    }
    println!("balance: {}", slot.balance);
}

fn describe_layouts(layouts: &[LayoutKind]) -> String {
    layouts
        .iter()
        .map(|layout| layout.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let encoded = serde_json::to_string_pretty(value).context("failed encoding json")?;
    println!("{encoded}");
    Ok(())
}
