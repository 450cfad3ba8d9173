use alloc::{
    format,
    string::{String, ToString},
};

use num_bigint::BigUint;
use num_traits::Zero;

use crate::{rlp::trim_leading_zeros, ProofError};

/// A token amount: the exact on-chain integer plus the token's decimals.
///
/// The integer is authoritative. The decimal-scaled form exists for display
/// and is derived on demand, never compared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    magnitude: BigUint,
    decimals: u32,
}

impl Balance {
    pub fn new(magnitude: BigUint, decimals: u32) -> Self {
        Self {
            magnitude,
            decimals,
        }
    }

    /// Decode a big-endian storage word. RPC nodes often drop leading zero
    /// bytes, so any width up to 32 significant bytes is accepted.
    pub fn decode(raw_word: &[u8], decimals: u32) -> Result<Self, ProofError> {
        let trimmed = trim_leading_zeros(raw_word);
        if trimmed.len() > 32 {
            return Err(ProofError::DecodeUnderflow);
        }
        Ok(Self::new(BigUint::from_bytes_be(trimmed), decimals))
    }

    pub fn magnitude(&self) -> &BigUint {
        &self.magnitude
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    /// The scaled value as an exact, unreduced fraction `magnitude / 10^decimals`.
    pub fn ratio(&self) -> (BigUint, BigUint) {
        (self.magnitude.clone(), BigUint::from(10u32).pow(self.decimals))
    }

    /// Fixed-point rendering with exactly `decimals` fractional digits.
    pub fn to_decimal_string(&self) -> String {
        let (numerator, denominator) = self.ratio();
        let integer = &numerator / &denominator;
        if self.decimals == 0 {
            return integer.to_string();
        }

        let fraction = (&numerator % &denominator).to_string();
        let padding = "0".repeat(self.decimals as usize - fraction.len());
        format!("{integer}.{padding}{fraction}")
    }
}

impl core::fmt::Display for Balance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}
