use serde::{Deserialize, Serialize};
use std::fmt;

/// A fixed-width 32-byte identifier, displayed as base-58.
///
/// Covers mints, pools, vaults, and program ids — they're bytewise-equal,
/// base-58-displayed values with no further structure, so one newtype
/// backs all four spec roles instead of four near-identical wrappers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

/// The all-ones address: the System Program id, and the sentinel for "no mint".
pub const ALL_ONES: Address = Address([0xff; 32]);
/// The all-zeros address: the other reserved sentinel.
pub const ALL_ZEROS: Address = Address([0u8; 32]);

pub const WRAPPED_SOL: &str = "So11111111111111111111111111111111111111112";
pub const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

impl Address {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Some(Address(out))
    }

    pub fn from_base58(s: &str) -> Option<Self> {
        let decoded = bs58::decode(s).into_vec().ok()?;
        Self::from_bytes(&decoded)
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// A mint is invalid if it is the all-ones system program id or its
    /// base-58 form begins with ten `1` characters (a degenerate/burned PDA).
    pub fn is_valid_mint(&self) -> bool {
        if *self == ALL_ONES || *self == ALL_ZEROS {
            return false;
        }
        let encoded = self.to_base58();
        !encoded.starts_with("1111111111")
    }

    pub fn is_wrapped_sol(&self) -> bool {
        Self::from_base58(WRAPPED_SOL).map(|a| a == *self).unwrap_or(false)
    }

    pub fn is_stable(&self) -> bool {
        [USDC, USDT]
            .iter()
            .any(|s| Self::from_base58(s).map(|a| a == *self).unwrap_or(false))
    }

    pub fn is_quote(&self) -> bool {
        self.is_wrapped_sol() || self.is_stable()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

pub type MintAddress = Address;
pub type PoolAddress = Address;
pub type VaultAddress = Address;
pub type ProgramId = Address;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ones_is_invalid_mint() {
        assert!(!ALL_ONES.is_valid_mint());
    }

    #[test]
    fn all_zeros_is_invalid_mint() {
        assert!(!ALL_ZEROS.is_valid_mint());
    }

    #[test]
    fn wrapped_sol_is_valid_and_quote() {
        let wsol = Address::from_base58(WRAPPED_SOL).unwrap();
        assert!(wsol.is_valid_mint());
        assert!(wsol.is_quote());
    }

    #[test]
    fn round_trips_through_base58() {
        let a = Address([7u8; 32]);
        let s = a.to_base58();
        assert_eq!(Address::from_base58(&s).unwrap(), a);
    }
}
