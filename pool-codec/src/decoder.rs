//! Per-DEX binary pool layout decoding (spec §4.A).
//!
//! Every decode function is total: a too-short buffer, bad discriminator, or
//! invalid mint returns `None`, never panics. Dispatch is a single match on
//! `DexKind` (there are only five variants, known at compile time — no
//! method table).

use crate::address::Address;
use crate::types::{sanitize_price, DexKind, EnrichedData, PoolSnapshot};
use arrayref::array_ref;

/// Discriminator for a pump-fun bonding-curve account (first 8 bytes).
pub const PUMPFUN_DISCRIMINATOR: [u8; 8] = [0x17, 0xB7, 0xF8, 0x37, 0x60, 0xD8, 0xAC, 0x60];

/// All five layouts are little-endian, fixed-offset reads; these three
/// helpers are the only place that does the bounds check + slice-to-array
/// conversion, shared across every `decode_*` below.
fn read_pubkey(bytes: &[u8], start: usize) -> Option<Address> {
    let slice = bytes.get(start..start + 32)?;
    Some(Address(*array_ref![slice, 0, 32]))
}

fn read_u64_le(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(*array_ref![slice, 0, 8]))
}

fn read_u128_le(bytes: &[u8], offset: usize) -> Option<u128> {
    let slice = bytes.get(offset..offset + 16)?;
    Some(u128::from_le_bytes(*array_ref![slice, 0, 16]))
}

/// Entry point: decode a raw account update for the given venue.
pub fn decode(dex: DexKind, raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    match dex {
        DexKind::RaydiumCpmm => decode_raydium_cpmm(raw, slot, observed_at_ms, pool_address),
        DexKind::RaydiumAmmV4 => decode_raydium_amm_v4(raw, slot, observed_at_ms, pool_address),
        DexKind::OrcaWhirlpool => decode_orca_whirlpool(raw, slot, observed_at_ms, pool_address),
        DexKind::MeteoraDlmm => decode_meteora_dlmm(raw, slot, observed_at_ms, pool_address),
        DexKind::PumpFun => decode_pumpfun(raw, slot, observed_at_ms, pool_address),
    }
}

/// AMM-side liquidity derivation shared by every non-launchpad venue (spec
/// §4.A). Exposed so the Pool Tracker can re-derive `liquiditySol` from
/// vault-balance updates with the exact same rules (spec §4.F). Capped at
/// 1000 per the data model's own field contract (spec §3) — the narrower
/// 100000 figure in §4.A's prose is scoped to that section's geometric-mean
/// branch only and doesn't loosen the field-level bound every branch here
/// must respect (see DESIGN.md Open Question resolutions).
pub fn amm_liquidity_sol(quote_is_sol: bool, quote_is_stable: bool, quote_reserve: u64, reserve0: u64, reserve1: u64) -> f64 {
    if quote_is_sol {
        quote_reserve as f64 / 1e9
    } else if quote_is_stable {
        quote_reserve as f64 / 1e6
    } else {
        (reserve0 as f64 * reserve1 as f64).sqrt() / 1e11
    }
    .min(1000.0)
}

fn decode_raydium_cpmm(raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    if raw.len() < 354 {
        return None;
    }
    let mint0 = read_pubkey(raw, 72)?;
    let mint1 = read_pubkey(raw, 104)?;
    let lp_mint = read_pubkey(raw, 136)?;
    let base_vault = read_pubkey(raw, 168)?;
    let quote_vault = read_pubkey(raw, 200)?;
    let token0_amount = read_u64_le(raw, 338)?;
    let token1_amount = read_u64_le(raw, 346)?;

    if !mint0.is_valid_mint() || !mint1.is_valid_mint() {
        return None;
    }

    let (base_mint, quote_mint, base_reserve, quote_reserve) = if mint1.is_quote() {
        (mint0, mint1, token0_amount, token1_amount)
    } else {
        (mint1, mint0, token1_amount, token0_amount)
    };

    let liquidity_sol = amm_liquidity_sol(
        quote_mint.is_wrapped_sol(),
        quote_mint.is_stable(),
        quote_reserve,
        token0_amount,
        token1_amount,
    );
    let price_sol_per_token = if base_reserve > 0 {
        sanitize_price((quote_reserve as f64 / 1e9) / (base_reserve as f64 / 1e6))
    } else {
        0.0
    };

    Some(PoolSnapshot {
        dex: DexKind::RaydiumCpmm,
        pool_address,
        base_mint: Some(base_mint),
        quote_mint: Some(quote_mint),
        slot,
        observed_at_ms,
        enriched: EnrichedData {
            liquidity_sol: Some(liquidity_sol),
            token0_amount: Some(token0_amount),
            token1_amount: Some(token1_amount),
            base_vault: Some(base_vault),
            quote_vault: Some(quote_vault),
            lp_mint: Some(lp_mint),
            price_sol_per_token: Some(price_sol_per_token),
            ..Default::default()
        },
    })
}

/// Reserves for AMMv4 are only readable from vault subscriptions; liquidity
/// is reported as unknown (0) at discovery time (spec §9 open question).
fn decode_raydium_amm_v4(raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    if raw.len() < 464 {
        return None;
    }
    let lp_mint = read_pubkey(raw, 304)?;
    let base_mint = read_pubkey(raw, 336)?;
    let quote_mint = read_pubkey(raw, 368)?;
    let base_vault = read_pubkey(raw, 400)?;
    let quote_vault = read_pubkey(raw, 432)?;

    if !base_mint.is_valid_mint() || !quote_mint.is_valid_mint() {
        return None;
    }

    let (base_mint, quote_mint) = if quote_mint.is_quote() {
        (base_mint, quote_mint)
    } else {
        (quote_mint, base_mint)
    };

    Some(PoolSnapshot {
        dex: DexKind::RaydiumAmmV4,
        pool_address,
        base_mint: Some(base_mint),
        quote_mint: Some(quote_mint),
        slot,
        observed_at_ms,
        enriched: EnrichedData {
            liquidity_sol: Some(0.0),
            base_vault: Some(base_vault),
            quote_vault: Some(quote_vault),
            lp_mint: Some(lp_mint),
            ..Default::default()
        },
    })
}

fn decode_orca_whirlpool(raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    if raw.len() < 245 {
        return None;
    }
    let liquidity = read_u128_le(raw, 49)?;
    let sqrt_price_x64 = read_u128_le(raw, 65)?;
    let mint_a = read_pubkey(raw, 101)?;
    let vault_a = read_pubkey(raw, 133)?;
    let mint_b = read_pubkey(raw, 181)?;
    let vault_b = read_pubkey(raw, 213)?;

    if !mint_a.is_valid_mint() || !mint_b.is_valid_mint() {
        return None;
    }

    // price = (sqrtPriceX64 / 2^64)^2
    let sqrt_price = sqrt_price_x64 as f64 / 2f64.powi(64);
    let raw_price = sqrt_price * sqrt_price;

    let (base_mint, quote_mint, base_vault, quote_vault, price_sol_per_token) = if mint_b.is_wrapped_sol() {
        (mint_a, mint_b, vault_a, vault_b, sanitize_price(raw_price * (1e6 / 1e9)))
    } else if mint_a.is_wrapped_sol() {
        let reciprocal = if raw_price > 0.0 { 1.0 / raw_price } else { 0.0 };
        (mint_b, mint_a, vault_b, vault_a, sanitize_price(reciprocal * (1e6 / 1e9)))
    } else {
        (mint_a, mint_b, vault_a, vault_b, sanitize_price(raw_price))
    };

    // `liquidity` (the in-range concentrated-liquidity amount at the current
    // tick) isn't the same quantity as the reserve-based `liquiditySol` the
    // other four layouts report; this field is read but left unused here
    // rather than misrepresented as a reserve estimate.
    let _ = liquidity;

    Some(PoolSnapshot {
        dex: DexKind::OrcaWhirlpool,
        pool_address,
        base_mint: Some(base_mint),
        quote_mint: Some(quote_mint),
        slot,
        observed_at_ms,
        enriched: EnrichedData {
            // No reserve amounts in this layout; liquidity stays unknown
            // until a vault subscription resolves it (spec §9 open question,
            // same "0/unknown at discovery" treatment as Raydium AMMv4).
            liquidity_sol: None,
            base_vault: Some(base_vault),
            quote_vault: Some(quote_vault),
            price_sol_per_token: Some(price_sol_per_token),
            ..Default::default()
        },
    })
}

fn decode_meteora_dlmm(raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    if raw.len() < 136 {
        return None;
    }
    let mint_x = read_pubkey(raw, 8)?;
    let mint_y = read_pubkey(raw, 40)?;
    let reserve_x = read_pubkey(raw, 72)?;
    let reserve_y = read_pubkey(raw, 104)?;

    if !mint_x.is_valid_mint() || !mint_y.is_valid_mint() {
        return None;
    }

    let (base_mint, quote_mint, base_vault, quote_vault) = if mint_y.is_quote() {
        (mint_x, mint_y, reserve_x, reserve_y)
    } else {
        (mint_y, mint_x, reserve_y, reserve_x)
    };

    Some(PoolSnapshot {
        dex: DexKind::MeteoraDlmm,
        pool_address,
        base_mint: Some(base_mint),
        quote_mint: Some(quote_mint),
        slot,
        observed_at_ms,
        enriched: EnrichedData {
            base_vault: Some(base_vault),
            quote_vault: Some(quote_vault),
            ..Default::default()
        },
    })
}

/// The launchpad account never contains the mint — it's recovered separately
/// via the `["bonding-curve", mint]` PDA mapping (spec §4.A, §4.G). `base_mint`
/// is left `None` here; the tracker fills it in once the mapping resolves.
fn decode_pumpfun(raw: &[u8], slot: u64, observed_at_ms: u64, pool_address: Address) -> Option<PoolSnapshot> {
    if raw.len() != 151 {
        return None;
    }
    if raw[0..8] != PUMPFUN_DISCRIMINATOR {
        return None;
    }

    let virtual_token_reserves = read_u64_le(raw, 8)?;
    let virtual_sol_reserves = read_u64_le(raw, 16)?;
    let real_token_reserves = read_u64_le(raw, 24)?;
    let real_sol_reserves = read_u64_le(raw, 32)?;
    let token_supply = read_u64_le(raw, 40)?;
    let complete = raw[48] != 0;

    let liquidity_sol = virtual_sol_reserves as f64 / 1e9;
    // Sanity clamp: a brand-new bonding curve outside (1, 100) SOL is
    // treated as a parse error, not a usable snapshot (spec §4.A, the
    // stricter of the two bounds the source used, per spec §9).
    if !(liquidity_sol > 1.0 && liquidity_sol < 100.0) {
        return None;
    }

    let price_sol_per_token = if virtual_token_reserves > 0 {
        sanitize_price(
            (virtual_sol_reserves as f64 / 1e9) / (virtual_token_reserves as f64 / 1e6),
        )
    } else {
        0.0
    };

    Some(PoolSnapshot {
        dex: DexKind::PumpFun,
        pool_address,
        base_mint: None,
        quote_mint: Address::from_base58(crate::address::WRAPPED_SOL),
        slot,
        observed_at_ms,
        enriched: EnrichedData {
            liquidity_sol: Some(liquidity_sol),
            virtual_sol_reserves: Some(virtual_sol_reserves),
            virtual_token_reserves: Some(virtual_token_reserves),
            real_sol_reserves: Some(real_sol_reserves),
            real_token_reserves: Some(real_token_reserves),
            token_supply: Some(token_supply),
            complete: Some(complete),
            price_sol_per_token: Some(price_sol_per_token),
            ..Default::default()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pumpfun_bytes(virtual_sol_lamports: u64, complete: bool) -> Vec<u8> {
        let mut buf = vec![0u8; 151];
        buf[0..8].copy_from_slice(&PUMPFUN_DISCRIMINATOR);
        buf[8..16].copy_from_slice(&1_000_000_000_000u64.to_le_bytes()); // virtual token reserves
        buf[16..24].copy_from_slice(&virtual_sol_lamports.to_le_bytes());
        buf[24..32].copy_from_slice(&900_000_000_000u64.to_le_bytes());
        buf[32..40].copy_from_slice(&(virtual_sol_lamports - 1).to_le_bytes());
        buf[40..48].copy_from_slice(&1_000_000_000_000u64.to_le_bytes());
        buf[48] = complete as u8;
        buf
    }

    #[test]
    fn pumpfun_150_bytes_is_none() {
        let buf = vec![0u8; 150];
        assert!(decode_pumpfun(&buf, 1, 1, Address([0; 32])).is_none());
    }

    #[test]
    fn pumpfun_151_bytes_correct_discriminator_decodes() {
        let buf = pumpfun_bytes(45_000_000_000, false);
        let snap = decode_pumpfun(&buf, 1, 1, Address([0; 32])).unwrap();
        assert_eq!(snap.enriched.liquidity_sol, Some(45.0));
    }

    #[test]
    fn pumpfun_wrong_discriminator_is_none() {
        let mut buf = pumpfun_bytes(45_000_000_000, false);
        buf[0] = 0x00;
        assert!(decode_pumpfun(&buf, 1, 1, Address([0; 32])).is_none());
    }

    #[test]
    fn pumpfun_outside_sanity_clamp_is_none() {
        let buf = pumpfun_bytes(500_000_000, false); // 0.5 SOL, below (1,100)
        assert!(decode_pumpfun(&buf, 1, 1, Address([0; 32])).is_none());
    }

    #[test]
    fn whirlpool_zero_sqrt_price_yields_zero_not_nan() {
        let mut buf = vec![0u8; 245];
        // mint_a / mint_b filled with distinct non-degenerate pubkeys
        buf[101..133].copy_from_slice(&[1u8; 32]);
        buf[181..213].copy_from_slice(&[2u8; 32]);
        let snap = decode_orca_whirlpool(&buf, 1, 1, Address([0; 32])).unwrap();
        assert_eq!(snap.enriched.price_sol_per_token, Some(0.0));
        assert!(snap.enriched.price_sol_per_token.unwrap().is_finite());
    }

    #[test]
    fn decode_twice_is_byte_identical() {
        let buf = pumpfun_bytes(45_000_000_000, false);
        let a = decode_pumpfun(&buf, 7, 100, Address([9; 32])).unwrap();
        let b = decode_pumpfun(&buf, 7, 100, Address([9; 32])).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
