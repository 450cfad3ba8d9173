use serde::{Deserialize, Serialize};

/// Reasons a proof, a storage word or a layout search can fail.
///
/// None of these are retried by the core. `LayoutNotFound` is an ordinary
/// negative answer and is kept apart from the verification failures so callers
/// can tell an unsupported contract from a tampered proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofError {
    MalformedEncoding,
    MalformedNode,
    ProofNodeMissing,
    PathMismatch,
    ValueMismatch,
    ProofIncomplete,
    LayoutNotFound,
    DecodeUnderflow,
}

impl ProofError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedEncoding => "malformed RLP encoding",
            Self::MalformedNode => "invalid trie node shape",
            Self::ProofNodeMissing => "no proof node matches the expected reference",
            Self::PathMismatch => "trie path diverges from the queried key",
            Self::ValueMismatch => "proven value differs from the claimed value",
            Self::ProofIncomplete => "proof ends before reaching a value",
            Self::LayoutNotFound => "no supported storage layout matches the reference balance",
            Self::DecodeUnderflow => "storage word cannot be decoded into a magnitude",
        }
    }

    /// Stable machine-readable code, used in JSON output.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedEncoding => "MalformedEncoding",
            Self::MalformedNode => "MalformedNode",
            Self::ProofNodeMissing => "ProofNodeMissing",
            Self::PathMismatch => "PathMismatch",
            Self::ValueMismatch => "ValueMismatch",
            Self::ProofIncomplete => "ProofIncomplete",
            Self::LayoutNotFound => "LayoutNotFound",
            Self::DecodeUnderflow => "DecodeUnderflow",
        }
    }
}

impl core::fmt::Display for ProofError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for ProofError {}
