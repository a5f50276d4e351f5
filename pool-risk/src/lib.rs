//! Feature extraction and risk scoring (spec §4.C, §4.D) plus the
//! position-tracking pool-state cache (spec §4.F position mode).

pub mod features;
pub mod position_cache;
pub mod scorer;

pub use features::{extract, BundleConfidence, FeatureInputs, FeatureVector, FEATURE_COUNT};
pub use position_cache::{CacheStats, CachedSnapshot, PositionCache, TrackedPosition};
pub use scorer::{
    default_pattern_library, evaluate_gate, match_patterns, Flag, GateDecision, PatternMatch, QuantizedLayer,
    RiskReport, RiskScorer, RiskLevel, ScamPattern, ScoringMode, Severity, TernaryNetwork, WeightsFile,
};

pub mod prelude {
    pub use crate::features::{extract, BundleConfidence, FeatureInputs, FeatureVector, FEATURE_COUNT};
    pub use crate::position_cache::{CacheStats, CachedSnapshot, PositionCache, TrackedPosition};
    pub use crate::scorer::{
        default_pattern_library, evaluate_gate, match_patterns, Flag, GateDecision, PatternMatch, QuantizedLayer,
        RiskReport, RiskScorer, RiskLevel, ScamPattern, ScoringMode, Severity, TernaryNetwork, WeightsFile,
    };
}
