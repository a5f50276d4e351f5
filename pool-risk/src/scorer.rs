//! Risk scoring (spec §4.D): a ternary-quantised feedforward classifier over
//! the 29-dim feature space, a pattern library matched by similarity in the
//! same space, hard-coded flag rules over the raw inputs, and the
//! paper-trading gating policy that consumes all three.

use crate::features::{FeatureInputs, FeatureVector, FEATURE_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Suspicious,
    Dangerous,
    Scam,
}

impl RiskLevel {
    fn from_class_index(idx: usize) -> Self {
        match idx {
            0 => RiskLevel::Safe,
            1 => RiskLevel::Suspicious,
            2 => RiskLevel::Dangerous,
            _ => RiskLevel::Scam,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flag {
    pub kind: String,
    pub severity: Severity,
    pub message: String,
}

/// `neural` when the ternary weights file loaded; `rule-based` otherwise
/// (spec §4.D fallback, §7 "scorer-weights missing").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringMode {
    Neural,
    RuleBased,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskReport {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub confidence: u8,
    pub flags: Vec<Flag>,
    pub feature_importance: Vec<(usize, f32)>,
    pub mode: ScoringMode,
}

// ---------------------------------------------------------------------
// Ternary-quantised network
// ---------------------------------------------------------------------

/// One layer's weights, already ternary-quantised to `{-1, 0, +1}` and
/// stored one signed byte per weight (spec §4.D, §9: "parse once at
/// startup into typed arrays").
#[derive(Clone, Debug, Deserialize)]
pub struct QuantizedLayer {
    pub weights: Vec<i8>,
    pub biases: Vec<f32>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl QuantizedLayer {
    /// No multiplications: a ternary weight only ever adds, subtracts, or
    /// skips the corresponding input activation.
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.in_dim);
        let mut out = vec![0.0f32; self.out_dim];
        for o in 0..self.out_dim {
            let mut acc = self.biases[o];
            let row = &self.weights[o * self.in_dim..(o + 1) * self.in_dim];
            for (w, x) in row.iter().zip(input.iter()) {
                match *w {
                    1 => acc += *x,
                    -1 => acc -= *x,
                    _ => {}
                }
            }
            out[o] = acc;
        }
        out
    }
}

fn relu(v: &mut [f32]) {
    for x in v.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
}

fn softmax(v: &[f32]) -> Vec<f32> {
    let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = v.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / v.len() as f32; v.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

/// The on-disk weights schema: three `{weights, biases}` pairs for the
/// `29 -> 64 -> 32 -> 4` topology (spec §9).
#[derive(Clone, Debug, Deserialize)]
pub struct WeightsFile {
    pub layers: [QuantizedLayer; 3],
}

#[derive(Clone, Debug)]
pub struct TernaryNetwork {
    layers: [QuantizedLayer; 3],
}

impl TernaryNetwork {
    pub fn from_weights_file(file: WeightsFile) -> Self {
        Self { layers: file.layers }
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file: WeightsFile = serde_json::from_slice(&bytes)?;
        Ok(Self::from_weights_file(file))
    }

    /// Returns the 4-class softmax distribution over `{SAFE, SUSPICIOUS,
    /// DANGEROUS, SCAM}`, in that order.
    pub fn infer(&self, features: &FeatureVector) -> [f32; 4] {
        let h1 = {
            let mut v = self.layers[0].forward(features);
            relu(&mut v);
            v
        };
        let h2 = {
            let mut v = self.layers[1].forward(&h1);
            relu(&mut v);
            v
        };
        let logits = self.layers[2].forward(&h2);
        let probs = softmax(&logits);
        [probs[0], probs[1], probs[2], probs[3]]
    }
}

// ---------------------------------------------------------------------
// Pattern library
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScamPattern {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub centroid: FeatureVector,
    pub required_indicators: HashSet<usize>,
    pub historical_rug_rate: f64,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub severity: Severity,
    pub confidence: f64,
    pub matched_indicators: HashSet<usize>,
}

fn cosine(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for i in 0..FEATURE_COUNT {
        dot += a[i] as f64 * b[i] as f64;
        na += (a[i] as f64).powi(2);
        nb += (b[i] as f64).powi(2);
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Indicator `i` is considered "present" when feature `i` exceeds the
/// midpoint of its range; indices 3 and 23 are signed `[-1,1]` axes so the
/// midpoint there is 0.
fn indicator_present(features: &FeatureVector, index: usize) -> bool {
    let v = features[index];
    if index == 3 || index == 23 {
        v > 0.0
    } else {
        v > 0.5
    }
}

pub fn match_patterns(features: &FeatureVector, patterns: &[ScamPattern]) -> Vec<PatternMatch> {
    let mut matches: Vec<PatternMatch> = patterns
        .iter()
        .filter(|p| p.active)
        .filter_map(|pattern| {
            let sim = (cosine(features, &pattern.centroid) + 1.0) / 2.0;
            let matched: HashSet<usize> = pattern
                .required_indicators
                .iter()
                .copied()
                .filter(|&i| indicator_present(features, i))
                .collect();
            let coverage = if pattern.required_indicators.is_empty() {
                1.0
            } else {
                matched.len() as f64 / pattern.required_indicators.len() as f64
            };
            let confidence = 0.6 * sim + 0.4 * coverage;
            if confidence >= 0.5 {
                Some(PatternMatch {
                    pattern_id: pattern.id.clone(),
                    severity: pattern.severity,
                    confidence,
                    matched_indicators: matched,
                })
            } else {
                None
            }
        })
        .collect();
    matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    matches.truncate(3);
    matches
}

/// At least 8 patterns, each a centroid in the 29-dim feature space, per
/// spec §4.D. Centroids are hand-authored to sit near the coordinates each
/// pattern's name implies; exact values are a calibration detail, not a
/// contract (only the shape and count are).
pub fn default_pattern_library() -> Vec<ScamPattern> {
    fn centroid(set: &[(usize, f32)]) -> FeatureVector {
        let mut v = [0.0f32; FEATURE_COUNT];
        for &(i, x) in set {
            v[i] = x;
        }
        v
    }

    vec![
        ScamPattern {
            id: "concentrated-supply".into(),
            name: "Concentrated supply".into(),
            severity: Severity::High,
            centroid: centroid(&[(6, 0.9), (7, 0.8), (10, 0.8)]),
            required_indicators: [6, 10].into_iter().collect(),
            historical_rug_rate: 0.62,
            active: true,
        },
        ScamPattern {
            id: "bundle-farm".into(),
            name: "Bundled wallet farm".into(),
            severity: Severity::Critical,
            centroid: centroid(&[(15, 1.0), (16, 0.9), (17, 0.85), (19, 0.1)]),
            required_indicators: [15, 17].into_iter().collect(),
            historical_rug_rate: 0.78,
            active: true,
        },
        ScamPattern {
            id: "mint-authority-live".into(),
            name: "Live mint authority".into(),
            severity: Severity::High,
            centroid: centroid(&[(11, 0.0), (12, 0.0), (13, 0.1)]),
            required_indicators: [11].into_iter().collect(),
            historical_rug_rate: 0.55,
            active: true,
        },
        ScamPattern {
            id: "freeze-trap".into(),
            name: "Freeze authority trap".into(),
            severity: Severity::Critical,
            centroid: centroid(&[(12, 0.0), (6, 0.7)]),
            required_indicators: [12].into_iter().collect(),
            historical_rug_rate: 0.7,
            active: true,
        },
        ScamPattern {
            id: "fresh-wallet-swarm".into(),
            name: "Fresh wallet swarm".into(),
            severity: Severity::Medium,
            centroid: centroid(&[(8, 0.9), (9, 0.6), (23, 0.8)]),
            required_indicators: [8].into_iter().collect(),
            historical_rug_rate: 0.4,
            active: true,
        },
        ScamPattern {
            id: "serial-rugger-creator".into(),
            name: "Serial rugger creator".into(),
            severity: Severity::Critical,
            centroid: centroid(&[(26, 1.0), (27, 1.0), (28, 0.6)]),
            required_indicators: [26, 27].into_iter().collect(),
            historical_rug_rate: 0.85,
            active: true,
        },
        ScamPattern {
            id: "low-liquidity-trap".into(),
            name: "Low liquidity trap".into(),
            severity: Severity::Medium,
            centroid: centroid(&[(0, 0.1), (1, 0.9)]),
            required_indicators: [0].into_iter().collect(),
            historical_rug_rate: 0.35,
            active: true,
        },
        ScamPattern {
            id: "unlocked-lp".into(),
            name: "Unlocked / unburned LP".into(),
            severity: Severity::High,
            centroid: centroid(&[(13, 0.0), (14, 0.0), (6, 0.6)]),
            required_indicators: [14].into_iter().collect(),
            historical_rug_rate: 0.58,
            active: true,
        },
        ScamPattern {
            id: "whale-dump-risk".into(),
            name: "Whale dump risk".into(),
            severity: Severity::Medium,
            centroid: centroid(&[(9, 0.8), (10, 0.85), (23, -0.5)]),
            required_indicators: [10].into_iter().collect(),
            historical_rug_rate: 0.45,
            active: true,
        },
    ]
}

// ---------------------------------------------------------------------
// Flags (hard-coded rules over the raw inputs, independent of the network)
// ---------------------------------------------------------------------

pub fn derive_flags(inputs: &FeatureInputs) -> Vec<Flag> {
    let mut flags = Vec::new();

    if inputs.top_whale_percent > 0.5 {
        flags.push(Flag {
            kind: "WHALE_CONCENTRATION".into(),
            severity: Severity::High,
            message: format!("top holder controls {:.0}% of supply", inputs.top_whale_percent * 100.0),
        });
    }
    if !inputs.mint_disabled {
        flags.push(Flag {
            kind: "MINT_AUTHORITY_ACTIVE".into(),
            severity: Severity::High,
            message: "mint authority has not been revoked".into(),
        });
    }
    if !inputs.freeze_disabled {
        flags.push(Flag {
            kind: "FREEZE_AUTHORITY_ACTIVE".into(),
            severity: Severity::Critical,
            message: "freeze authority has not been revoked".into(),
        });
    }
    if inputs.bundle_detected && inputs.bundle_control_percent > 0.8 {
        flags.push(Flag {
            kind: "BUNDLE_CONTROL".into(),
            severity: Severity::Critical,
            message: format!(
                "{} bundled wallets control {:.0}% of supply",
                inputs.bundle_wallet_count,
                inputs.bundle_control_percent * 100.0
            ),
        });
    } else if inputs.bundle_detected && inputs.bundle_control_percent > 0.5 {
        flags.push(Flag {
            kind: "BUNDLE_CONTROL".into(),
            severity: Severity::High,
            message: format!(
                "{} bundled wallets control {:.0}% of supply",
                inputs.bundle_wallet_count,
                inputs.bundle_control_percent * 100.0
            ),
        });
    }
    if inputs.lp_locked_pct < 0.5 && !inputs.lp_burned {
        flags.push(Flag {
            kind: "LP_UNLOCKED".into(),
            severity: Severity::Medium,
            message: "liquidity is neither locked nor burned".into(),
        });
    }
    if inputs.creator_rugged_count >= 3 {
        flags.push(Flag {
            kind: "CREATOR_RUG_HISTORY".into(),
            severity: Severity::Critical,
            message: format!("creator linked to {} prior rugs", inputs.creator_rugged_count),
        });
    } else if inputs.creator_rugged_count > 0 {
        flags.push(Flag {
            kind: "CREATOR_RUG_HISTORY".into(),
            severity: Severity::High,
            message: format!("creator linked to {} prior rugs", inputs.creator_rugged_count),
        });
    }
    if inputs.liquidity_usd < 1.0 {
        flags.push(Flag {
            kind: "NO_LIQUIDITY".into(),
            severity: Severity::Critical,
            message: "pool reports effectively no liquidity".into(),
        });
    }

    flags
}

// ---------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------

pub enum Mode {
    Neural(TernaryNetwork),
    RuleBased,
}

pub struct RiskScorer {
    mode: Mode,
    patterns: Vec<ScamPattern>,
}

/// Feature indices treated as "safety" axes for the rule-based fallback
/// (spec §4.D): each paired with the weight it contributes to the average.
/// `danger` axes are inverted (`1 - value`) before weighting.
const SAFETY_WEIGHTS: &[(usize, f64, bool)] = &[
    (6, 0.15, true),   // top10Concentration (danger)
    (11, 0.15, false), // mintDisabled (safety)
    (12, 0.15, false), // freezeDisabled (safety)
    (13, 0.15, false), // lpLocked (safety)
    (14, 0.1, false),  // lpBurned (safety)
    (17, 0.15, true),  // bundleControlPercent (danger)
    (27, 0.15, true),  // creatorRugHistory (danger)
];

impl RiskScorer {
    pub fn neural(network: TernaryNetwork, patterns: Vec<ScamPattern>) -> Self {
        Self { mode: Mode::Neural(network), patterns }
    }

    /// Constructed when the quantised weights file is missing (spec §7):
    /// permanently rule-based for the process lifetime.
    pub fn rule_based(patterns: Vec<ScamPattern>) -> Self {
        Self { mode: Mode::RuleBased, patterns }
    }

    /// Loads the ternary weights file if present; falls back to rule-based
    /// mode (logging once at warn level) if it's missing or malformed, per
    /// spec §7 "scorer-weights missing": the scorer then stays rule-based for
    /// the process lifetime.
    pub fn load(weights_path: &std::path::Path) -> Self {
        let patterns = default_pattern_library();
        match TernaryNetwork::load_from_path(weights_path) {
            Ok(net) => Self::neural(net, patterns),
            Err(e) => {
                tracing::warn!(path = %weights_path.display(), error = %e, "scorer weights missing or invalid, falling back to rule-based mode");
                Self::rule_based(patterns)
            }
        }
    }

    pub fn mode(&self) -> ScoringMode {
        match self.mode {
            Mode::Neural(_) => ScoringMode::Neural,
            Mode::RuleBased => ScoringMode::RuleBased,
        }
    }

    fn rule_based_score(&self, features: &FeatureVector) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for &(idx, weight, is_danger) in SAFETY_WEIGHTS {
            let v = features[idx] as f64;
            let safety = if is_danger { 1.0 - v } else { v };
            weighted += safety * weight;
            total_weight += weight;
        }
        let avg_safety = if total_weight > 0.0 { weighted / total_weight } else { 0.5 };
        (100.0 * (1.0 - avg_safety)).clamp(0.0, 100.0)
    }

    pub fn score(&self, inputs: &FeatureInputs, features: &FeatureVector) -> RiskReport {
        let flags = derive_flags(inputs);

        let (risk_score, risk_level, confidence, importance) = match &self.mode {
            Mode::Neural(net) => {
                let probs = net.infer(features);
                let raw = 100.0 * (probs[2] + probs[3]);
                let risk_score = raw.round().clamp(0.0, 100.0) as u8;
                let (argmax_idx, argmax_p) = probs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                    .unwrap();
                let confidence = (100.0 * argmax_p).round().clamp(0.0, 100.0) as u8;
                let importance = feature_importance(features);
                (risk_score, RiskLevel::from_class_index(argmax_idx), confidence, importance)
            }
            Mode::RuleBased => {
                let raw = self.rule_based_score(features);
                let risk_score = raw.round().clamp(0.0, 100.0) as u8;
                let level = match risk_score {
                    0..=29 => RiskLevel::Safe,
                    30..=59 => RiskLevel::Suspicious,
                    60..=79 => RiskLevel::Dangerous,
                    _ => RiskLevel::Scam,
                };
                let importance = feature_importance(features);
                (risk_score, level, 50u8, importance)
            }
        };

        RiskReport {
            risk_score,
            risk_level,
            confidence,
            flags,
            feature_importance: importance,
            mode: self.mode(),
        }
    }

    pub fn match_patterns(&self, features: &FeatureVector) -> Vec<PatternMatch> {
        match_patterns(features, &self.patterns)
    }
}

/// Rank coordinates by raw magnitude as a cheap proxy for "how much this
/// feature moved the score" — a real importance measure needs the network's
/// gradient or many labeled outcomes (`pool-sentinel`'s outcome learner
/// computes the latter from accumulated predictions).
fn feature_importance(features: &FeatureVector) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = features.iter().copied().enumerate().map(|(i, v)| (i, v.abs())).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    ranked.truncate(10);
    ranked
}

// ---------------------------------------------------------------------
// Gating policy (spec §4.D) — consumed by the paper-trading collaborator
// ---------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GateDecision {
    Accept,
    Warn(String),
    Reject(String),
}

pub fn evaluate_gate(report: &RiskReport, patterns: &[PatternMatch]) -> GateDecision {
    if report.flags.iter().any(|f| f.severity == Severity::Critical) {
        return GateDecision::Reject("critical flag present".into());
    }
    if report.risk_score > 75 {
        return GateDecision::Reject(format!("risk score {} exceeds 75", report.risk_score));
    }
    if patterns
        .iter()
        .any(|p| p.severity == Severity::Critical && p.confidence > 0.7)
    {
        return GateDecision::Reject("critical pattern match above 0.7 confidence".into());
    }
    if let Some(p) = patterns
        .iter()
        .find(|p| p.severity == Severity::High && p.confidence > 0.6)
    {
        return GateDecision::Warn(format!("high-severity pattern {} matched at {:.2}", p.pattern_id, p.confidence));
    }
    GateDecision::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract;

    #[test]
    fn rule_based_scores_safe_pool_low() {
        let mut inputs = FeatureInputs::default();
        inputs.mint_disabled = true;
        inputs.freeze_disabled = true;
        inputs.lp_locked_pct = 1.0;
        inputs.lp_burned = true;
        let features = extract(&inputs);
        let scorer = RiskScorer::rule_based(default_pattern_library());
        let report = scorer.score(&inputs, &features);
        assert!(report.risk_score < 30, "score was {}", report.risk_score);
        assert_eq!(report.mode, ScoringMode::RuleBased);
    }

    #[test]
    fn scenario_6_dangerous_pool_is_rejected() {
        let mut inputs = FeatureInputs::default();
        inputs.top10_concentration = 0.85;
        inputs.mint_disabled = false;
        inputs.bundle_detected = true;
        inputs.bundle_control_percent = 0.7;
        inputs.bundle_wallet_count = 12;
        let features = extract(&inputs);
        let scorer = RiskScorer::rule_based(default_pattern_library());
        let report = scorer.score(&inputs, &features);

        assert!(report.flags.iter().any(|f| f.severity >= Severity::High));
        let patterns = scorer.match_patterns(&features);
        let decision = evaluate_gate(&report, &patterns);
        assert_ne!(decision, GateDecision::Accept);
    }

    #[test]
    fn critical_flag_always_rejects_regardless_of_score() {
        let mut inputs = FeatureInputs::default();
        inputs.freeze_disabled = false; // CRITICAL flag
        inputs.mint_disabled = true;
        inputs.lp_locked_pct = 1.0;
        let features = extract(&inputs);
        let scorer = RiskScorer::rule_based(default_pattern_library());
        let report = scorer.score(&inputs, &features);
        let decision = evaluate_gate(&report, &[]);
        assert!(matches!(decision, GateDecision::Reject(_)));
    }

    #[test]
    fn pattern_match_confidence_is_bounded() {
        let inputs = FeatureInputs::default();
        let features = extract(&inputs);
        let matches = match_patterns(&features, &default_pattern_library());
        for m in matches {
            assert!(m.confidence >= 0.5 && m.confidence <= 1.0);
        }
    }

    #[test]
    fn neural_inference_is_deterministic() {
        let layer1 = QuantizedLayer { weights: vec![1; FEATURE_COUNT * 4], biases: vec![0.0; 4], in_dim: FEATURE_COUNT, out_dim: 4 };
        let layer2 = QuantizedLayer { weights: vec![1; 4 * 4], biases: vec![0.0; 4], in_dim: 4, out_dim: 4 };
        let layer3 = QuantizedLayer { weights: vec![1; 4 * 4], biases: vec![0.0; 4], in_dim: 4, out_dim: 4 };
        let net = TernaryNetwork::from_weights_file(WeightsFile { layers: [layer1, layer2, layer3] });
        let inputs = FeatureInputs::default();
        let features = extract(&inputs);
        let a = net.infer(&features);
        let b = net.infer(&features);
        assert_eq!(a, b);
    }
}
