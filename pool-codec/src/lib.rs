//! Binary account decoders and the shared data model for DEX pool discovery
//! (spec §3, §4.A, §4.B): five AMM/launchpad pool layouts, two token-metadata
//! layouts, and the `PoolSnapshot` / `PoolEvent` / `TokenMetadata` types that
//! the rest of the workspace builds on.

pub mod address;
pub mod decoder;
pub mod metadata;
pub mod types;

pub use address::{Address, MintAddress, PoolAddress, ProgramId, VaultAddress};
pub use decoder::{amm_liquidity_sol, decode};
pub use metadata::{decode_legacy_pda, decode_token2022_extension};
pub use types::{sanitize_price, DexKind, EnrichedData, PoolEvent, PoolEventKind, PoolSnapshot, TokenMetadata};

/// Convenient glob import for downstream crates.
pub mod prelude {
    pub use crate::address::{Address, MintAddress, PoolAddress, ProgramId, VaultAddress};
    pub use crate::decoder::{amm_liquidity_sol, decode};
    pub use crate::metadata::{decode_legacy_pda, decode_token2022_extension};
    pub use crate::types::{
        sanitize_price, DexKind, EnrichedData, PoolEvent, PoolEventKind, PoolSnapshot, TokenMetadata,
    };
}
