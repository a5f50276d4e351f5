use crate::address::{Address, MintAddress, PoolAddress, VaultAddress};
use serde::{Deserialize, Serialize};

/// Closed set of venues this system understands. The first four are AMM-style
/// pools; `PumpFun` is a bonding-curve launchpad and the only graduation source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexKind {
    RaydiumCpmm,
    RaydiumAmmV4,
    OrcaWhirlpool,
    MeteoraDlmm,
    PumpFun,
}

impl DexKind {
    /// Statically known program id for this venue, mirroring the
    /// `Protocol::get_program_id` table used throughout the retrieval pack.
    pub fn program_id(&self) -> Address {
        let s = match self {
            DexKind::RaydiumCpmm => "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C",
            DexKind::RaydiumAmmV4 => "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
            DexKind::OrcaWhirlpool => "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",
            DexKind::MeteoraDlmm => "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo",
            DexKind::PumpFun => "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
        };
        Address::from_base58(s).expect("static program id is valid base58")
    }

    pub fn is_amm(&self) -> bool {
        !matches!(self, DexKind::PumpFun)
    }

    pub fn all() -> [DexKind; 5] {
        [
            DexKind::RaydiumCpmm,
            DexKind::RaydiumAmmV4,
            DexKind::OrcaWhirlpool,
            DexKind::MeteoraDlmm,
            DexKind::PumpFun,
        ]
    }
}

impl std::fmt::Display for DexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DexKind::RaydiumCpmm => "RaydiumCPMM",
            DexKind::RaydiumAmmV4 => "RaydiumAMMv4",
            DexKind::OrcaWhirlpool => "OrcaWhirlpool",
            DexKind::MeteoraDlmm => "MeteoraDLMM",
            DexKind::PumpFun => "PumpFun",
        };
        write!(f, "{}", name)
    }
}

/// Per-DEX enrichment, all fields optional — only what that layout carries
/// is ever filled in by the decoder.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnrichedData {
    pub liquidity_sol: Option<f64>,
    pub token0_amount: Option<u64>,
    pub token1_amount: Option<u64>,
    pub virtual_sol_reserves: Option<u64>,
    pub virtual_token_reserves: Option<u64>,
    pub real_sol_reserves: Option<u64>,
    pub real_token_reserves: Option<u64>,
    pub token_supply: Option<u64>,
    pub complete: Option<bool>,
    pub base_vault: Option<VaultAddress>,
    pub quote_vault: Option<VaultAddress>,
    pub lp_mint: Option<Address>,
    pub price_sol_per_token: Option<f64>,
}

/// Rewrite non-finite floats to 0, per spec: prices are always non-negative,
/// NaN/Inf never leak out of the decoder.
pub fn sanitize_price(p: f64) -> f64 {
    if p.is_finite() && p >= 0.0 {
        p
    } else {
        0.0
    }
}

/// One decoded account update, normalized across all five venues.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub dex: DexKind,
    pub pool_address: PoolAddress,
    pub base_mint: Option<MintAddress>,
    pub quote_mint: Option<MintAddress>,
    pub slot: u64,
    pub observed_at_ms: u64,
    pub enriched: EnrichedData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEventKind {
    NewPool,
    Graduation,
    PriceUpdate,
}

/// What leaves the system once metadata has resolved (or timed out).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolEvent {
    pub kind: PoolEventKind,
    pub pool_snapshot: PoolSnapshot,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub graduated_from: Option<DexKind>,
    pub bonding_curve_duration_ms: Option<u64>,
}

impl PoolEvent {
    /// The dedup / uniqueness key from spec invariant 1. Requires a resolved
    /// base mint — the launchpad-mint mapping gates emission before this is
    /// ever called on a PumpFun snapshot.
    pub fn dedup_key(&self) -> Option<(DexKind, MintAddress, Option<MintAddress>)> {
        Some((self.pool_snapshot.dex, self.pool_snapshot.base_mint?, self.pool_snapshot.quote_mint))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: MintAddress,
    pub name: String,
    pub symbol: String,
    pub cached_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_price_rewritten_to_zero() {
        assert_eq!(sanitize_price(f64::NAN), 0.0);
        assert_eq!(sanitize_price(f64::INFINITY), 0.0);
        assert_eq!(sanitize_price(-1.0), 0.0);
        assert_eq!(sanitize_price(1.5), 1.5);
    }

    #[test]
    fn dex_program_ids_are_distinct() {
        let ids: std::collections::HashSet<_> = DexKind::all().iter().map(|d| d.program_id()).collect();
        assert_eq!(ids.len(), 5);
    }
}
