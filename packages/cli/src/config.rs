//! Command-line arguments shared by the network subcommands, and their
//! translation into core probe settings.

use std::ops::Range;

use anyhow::{ensure, Context, Result};
use clap::{Args, ValueEnum};
use storage_proof_core::{CheckpointLayout, LayoutKind, ProbeConfig};

use crate::rpc;

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Ethereum JSON-RPC URL.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// ERC20 token contract address.
    #[arg(long, value_parser = parse_address)]
    pub contract: [u8; 20],

    /// Token holder address.
    #[arg(long, value_parser = parse_address)]
    pub holder: [u8; 20],

    /// Block height to prove at (0 or absent: latest block).
    #[arg(long)]
    pub height: Option<u64>,
}

impl TargetArgs {
    pub fn block_tag(&self) -> String {
        rpc::block_tag(self.height)
    }
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Storage layout to look for.
    #[arg(long, value_enum, default_value_t = LayoutHint::Auto)]
    pub layout: LayoutHint,

    /// Declaration slots to probe, as START..END.
    #[arg(long, default_value = "0..20", value_parser = parse_slot_range)]
    pub slot_range: Range<u64>,

    /// Bits of a checkpoint word holding the block number (the low end).
    #[arg(long, default_value_t = 128)]
    pub checkpoint_block_bits: u32,
}

impl ProbeArgs {
    pub fn checkpoint_layout(&self) -> Result<CheckpointLayout> {
        checkpoint_layout(self.checkpoint_block_bits)
    }

    pub fn probe_config(&self, target_block: u64) -> Result<ProbeConfig> {
        Ok(ProbeConfig {
            slot_range: self.slot_range.clone(),
            layouts: self.layout.layouts(),
            checkpoint_layout: self.checkpoint_layout()?,
            target_block,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutHint {
    /// Try a plain mapping, then MiniMe checkpoints.
    Auto,
    Mapping,
    Checkpoint,
}

impl LayoutHint {
    pub fn layouts(self) -> Vec<LayoutKind> {
        match self {
            LayoutHint::Auto => LayoutKind::ALL.to_vec(),
            LayoutHint::Mapping => vec![LayoutKind::Mapping],
            LayoutHint::Checkpoint => vec![LayoutKind::Checkpoint],
        }
    }

    /// The single layout named by the hint, if it names one.
    pub fn kind(self) -> Option<LayoutKind> {
        match self {
            LayoutHint::Auto => None,
            LayoutHint::Mapping => Some(LayoutKind::Mapping),
            LayoutHint::Checkpoint => Some(LayoutKind::Checkpoint),
        }
    }
}

pub fn checkpoint_layout(block_bits: u32) -> Result<CheckpointLayout> {
    CheckpointLayout::new(block_bits).with_context(|| {
        format!("--checkpoint-block-bits must be a multiple of 8 between 8 and 248, got {block_bits}")
    })
}

pub fn parse_address(s: &str) -> Result<[u8; 20]> {
    rpc::parse_hex_address(s)
}

pub fn parse_slot_range(s: &str) -> Result<Range<u64>> {
    let (start, end) = s
        .split_once("..")
        .context("slot range must look like START..END")?;
    let start: u64 = start.trim().parse().context("invalid range start")?;
    let end: u64 = end.trim().parse().context("invalid range end")?;
    ensure!(start < end, "slot range {start}..{end} is empty");
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slot_ranges() {
        assert_eq!(parse_slot_range("0..20").unwrap(), 0..20);
        assert_eq!(parse_slot_range(" 3 .. 4 ").unwrap(), 3..4);
        assert!(parse_slot_range("5..5").is_err());
        assert!(parse_slot_range("9..2").is_err());
        assert!(parse_slot_range("7").is_err());
        assert!(parse_slot_range("a..b").is_err());
    }

    #[test]
    fn hint_selects_layouts() {
        assert_eq!(
            LayoutHint::Auto.layouts(),
            vec![LayoutKind::Mapping, LayoutKind::Checkpoint]
        );
        assert_eq!(LayoutHint::Checkpoint.layouts(), vec![LayoutKind::Checkpoint]);
        assert_eq!(LayoutHint::Auto.kind(), None);
    }

    #[test]
    fn probe_config_from_args() {
        let args = ProbeArgs {
            layout: LayoutHint::Mapping,
            slot_range: 2..9,
            checkpoint_block_bits: 64,
        };
        let config = args.probe_config(1234).unwrap();
        assert_eq!(config.slot_range, 2..9);
        assert_eq!(config.layouts, vec![LayoutKind::Mapping]);
        assert_eq!(config.checkpoint_layout.block_bits(), 64);
        assert_eq!(config.target_block, 1234);

        let bad = ProbeArgs {
            checkpoint_block_bits: 100,
            ..args
        };
        assert!(bad.probe_config(1).is_err());
    }
}
