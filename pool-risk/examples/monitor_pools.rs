//! Decodes a pump-fun bonding-curve account, extracts its feature vector,
//! and prints the risk report plus any pattern matches — a standalone
//! demonstration of `pool-codec` + `pool-risk` with no network dependency.

use pool_codec::{decode, DexKind};
use pool_risk::prelude::*;

fn main() {
    let mut raw = vec![0u8; 151];
    raw[0..8].copy_from_slice(&[0x17, 0xB7, 0xF8, 0x37, 0x60, 0xD8, 0xAC, 0x60]);
    raw[8..16].copy_from_slice(&1_000_000_000_000u64.to_le_bytes()); // virtual token reserves
    raw[16..24].copy_from_slice(&45_000_000_000u64.to_le_bytes()); // virtual sol reserves
    raw[24..32].copy_from_slice(&900_000_000_000u64.to_le_bytes());
    raw[32..40].copy_from_slice(&44_000_000_000u64.to_le_bytes());
    raw[40..48].copy_from_slice(&1_000_000_000_000u64.to_le_bytes());

    let snapshot = decode(DexKind::PumpFun, &raw, 1, 0, pool_codec::Address([7; 32]))
        .expect("well-formed pump-fun account decodes");

    println!("decoded snapshot: {snapshot:?}");

    // Pump-fun pools are always SOL-quoted, so `liquiditySol` needs the
    // SOL/USD rate applied; a stablecoin-quoted pool's value is already
    // USD-equivalent and must not be multiplied again.
    const SOL_USD_RATE: f64 = 150.0;
    let mut inputs = FeatureInputs::default();
    inputs.liquidity_usd = snapshot.enriched.liquidity_sol.unwrap_or(0.0) * SOL_USD_RATE;
    inputs.mint_disabled = true;
    inputs.freeze_disabled = true;

    let features = extract(&inputs);
    let scorer = RiskScorer::rule_based(default_pattern_library());
    let report = scorer.score(&inputs, &features);
    let patterns = scorer.match_patterns(&features);
    let decision = evaluate_gate(&report, &patterns);

    println!("risk report: {report:?}");
    println!("pattern matches: {patterns:?}");
    println!("gate decision: {decision:?}");
}
