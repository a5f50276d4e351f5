//! Feature extraction (spec §4.C): a pure, total function from a bag of
//! named quantities to the fixed 29-float vector the scorer and pattern
//! library both key off of. Every coordinate is clamped into its documented
//! range and non-finite inputs resolve to the documented defaults, so the
//! extractor can never hand the scorer a NaN.

use serde::{Deserialize, Serialize};

/// Number of coordinates in the feature vector; a public contract shared
/// with `pool-sentinel`'s emission path and the scorer's weight shapes.
pub const FEATURE_COUNT: usize = 29;

pub type FeatureVector = [f32; FEATURE_COUNT];

/// Bundle severity as reported by the (external) bundle-detection collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleConfidence {
    Low,
    Med,
    High,
}

/// Every named quantity the 29 features are derived from. Fields default to
/// the "unknown" value the spec documents for that coordinate, so a caller
/// with partial information (e.g. a pool seen seconds after creation) can
/// fill in only what it has.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureInputs {
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub price_change_5m_pct: f64,
    pub holder_count: u64,

    pub top10_concentration: f64,
    pub gini: f64,
    pub fresh_wallet_ratio: f64,
    pub whale_count: u64,
    pub top_whale_percent: f64,

    pub mint_disabled: bool,
    pub freeze_disabled: bool,
    pub lp_locked_pct: f64,
    pub lp_burned: bool,

    pub bundle_detected: bool,
    pub bundle_wallet_count: u64,
    pub bundle_control_percent: f64,
    pub bundle_confidence: Option<BundleConfidence>,

    pub buys_24h: u64,
    pub sells_24h: u64,
    pub buys_1h: u64,
    pub sells_1h: u64,
    pub txns_24h: u64,

    pub age_hours: f64,
    pub has_recent_trade: bool,

    pub creator_identified: bool,
    pub creator_rugged_count: u64,
    pub creator_holdings_pct: f64,
}

impl Default for FeatureInputs {
    fn default() -> Self {
        Self {
            liquidity_usd: 0.0,
            volume_24h: 0.0,
            market_cap: 0.0,
            price_change_5m_pct: 0.0,
            holder_count: 0,
            top10_concentration: 0.0,
            gini: 0.0,
            fresh_wallet_ratio: 0.0,
            whale_count: 0,
            top_whale_percent: 0.0,
            mint_disabled: false,
            freeze_disabled: false,
            lp_locked_pct: 0.0,
            lp_burned: false,
            bundle_detected: false,
            bundle_wallet_count: 0,
            bundle_control_percent: 0.0,
            bundle_confidence: None,
            buys_24h: 0,
            sells_24h: 0,
            buys_1h: 0,
            sells_1h: 0,
            txns_24h: 0,
            age_hours: 0.0,
            has_recent_trade: false,
            creator_identified: false,
            creator_rugged_count: 0,
            creator_holdings_pct: 0.0,
        }
    }
}

/// NaN/Inf never leak into the vector: probabilities fall back to `0.5`,
/// counts fall back to `0`, per spec §4.C.
fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn clamp01(value: f64) -> f64 {
    finite_or(value, 0.5).clamp(0.0, 1.0)
}

fn ratio(numerator: f64, denominator_terms: f64) -> f64 {
    if denominator_terms <= 0.0 {
        0.5
    } else {
        clamp01(numerator / denominator_terms)
    }
}

/// Compute the 29-coordinate vector from a snapshot of named inputs
/// (spec §4.C's table, in index order).
pub fn extract(inputs: &FeatureInputs) -> FeatureVector {
    let liquidity_log = clamp01(finite_or((inputs.liquidity_usd.max(1.0)).log10() / 7.0, 0.0));
    let volume_to_liquidity = clamp01(
        (inputs.volume_24h / inputs.liquidity_usd.max(1.0)).min(5.0) / 5.0,
    );
    let market_cap_log = clamp01(finite_or((inputs.market_cap.max(1.0)).log10() / 9.0, 0.0));
    let price_velocity = (finite_or(inputs.price_change_5m_pct, 0.0) / 100.0).clamp(-1.0, 1.0);
    let volume_log = clamp01(finite_or((inputs.volume_24h.max(1.0)).log10() / 7.0, 0.0));
    let holder_count_log = clamp01(finite_or(((inputs.holder_count.max(1)) as f64).log10() / 4.0, 0.0));

    let top10_concentration = clamp01(inputs.top10_concentration);
    let gini = clamp01(inputs.gini);
    let fresh_wallet_ratio = clamp01(inputs.fresh_wallet_ratio);
    let whale_count = clamp01(inputs.whale_count as f64 / 10.0);
    let top_whale_percent = clamp01(inputs.top_whale_percent);

    let mint_disabled = if inputs.mint_disabled { 1.0 } else { 0.0 };
    let freeze_disabled = if inputs.freeze_disabled { 1.0 } else { 0.0 };
    let lp_locked_pct = clamp01(inputs.lp_locked_pct);
    let lp_locked = if lp_locked_pct > 0.5 { 1.0 } else { lp_locked_pct };
    let lp_burned = if inputs.lp_burned { 1.0 } else { 0.0 };

    let bundle_detected = if inputs.bundle_detected { 1.0 } else { 0.0 };
    let bundle_count_norm = clamp01(inputs.bundle_wallet_count as f64 / 20.0);
    let bundle_control_percent = clamp01(inputs.bundle_control_percent);
    let bundle_confidence = match inputs.bundle_confidence {
        Some(BundleConfidence::High) => 1.0,
        Some(BundleConfidence::Med) => 0.6,
        Some(BundleConfidence::Low) => 0.3,
        None => 0.0,
    };
    let bundle_quality = if inputs.bundle_detected {
        clamp01(1.0 - bundle_control_percent)
    } else {
        1.0
    };

    let buy_ratio_24h = ratio(inputs.buys_24h as f64, (inputs.buys_24h + inputs.sells_24h) as f64);
    let buy_ratio_1h = ratio(inputs.buys_1h as f64, (inputs.buys_1h + inputs.sells_1h) as f64);
    let activity_level = clamp01(inputs.txns_24h as f64 / 100.0);
    let momentum = (2.0 * buy_ratio_24h - 1.0).clamp(-1.0, 1.0);
    let age_decay = clamp01(finite_or((-inputs.age_hours / 24.0).exp(), 0.5));
    let trading_recency = if inputs.has_recent_trade { 1.0 } else { 0.5 };

    let creator_identified = if inputs.creator_identified { 1.0 } else { 0.0 };
    let creator_rug_history = clamp01(inputs.creator_rugged_count as f64 / 5.0);
    let creator_holdings = clamp01(inputs.creator_holdings_pct);

    [
        liquidity_log as f32,
        volume_to_liquidity as f32,
        market_cap_log as f32,
        price_velocity as f32,
        volume_log as f32,
        holder_count_log as f32,
        top10_concentration as f32,
        gini as f32,
        fresh_wallet_ratio as f32,
        whale_count as f32,
        top_whale_percent as f32,
        mint_disabled as f32,
        freeze_disabled as f32,
        lp_locked as f32,
        lp_burned as f32,
        bundle_detected as f32,
        bundle_count_norm as f32,
        bundle_control_percent as f32,
        bundle_confidence as f32,
        bundle_quality as f32,
        buy_ratio_24h as f32,
        buy_ratio_1h as f32,
        activity_level as f32,
        momentum as f32,
        age_decay as f32,
        trading_recency as f32,
        creator_identified as f32,
        creator_rug_history as f32,
        creator_holdings as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_inputs_produce_finite_vector_in_range() {
        let v = extract(&FeatureInputs::default());
        assert_eq!(v.len(), FEATURE_COUNT);
        for (i, x) in v.iter().enumerate() {
            assert!(x.is_finite(), "coordinate {i} not finite: {x}");
            assert!(*x >= -1.0 && *x <= 1.0, "coordinate {i} out of range: {x}");
        }
    }

    #[test]
    fn nan_inputs_never_leak_through() {
        let mut inputs = FeatureInputs::default();
        inputs.liquidity_usd = f64::NAN;
        inputs.price_change_5m_pct = f64::INFINITY;
        inputs.age_hours = f64::NAN;
        let v = extract(&inputs);
        for x in v.iter() {
            assert!(x.is_finite());
        }
    }

    #[test]
    fn unknown_trading_recency_defaults_to_half() {
        let inputs = FeatureInputs::default();
        let v = extract(&inputs);
        assert_eq!(v[25], 0.5);
    }

    #[test]
    fn high_concentration_and_bundle_control_score_low_on_safety_axes() {
        let mut inputs = FeatureInputs::default();
        inputs.top10_concentration = 0.85;
        inputs.bundle_detected = true;
        inputs.bundle_control_percent = 0.7;
        let v = extract(&inputs);
        assert_eq!(v[6], 0.85);
        assert_eq!(v[15], 1.0);
        assert!(v[19] < 0.35); // bundle_quality
    }
}
