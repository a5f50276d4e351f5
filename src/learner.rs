//! Outcome Learner (spec §4.I): an in-process, process-lifetime store of
//! predictions and their later-arriving outcomes, exposing accuracy and
//! feature-importance statistics. Grounded in `pool-risk::position_cache`'s
//! `DashMap`-backed shared-state idiom, applied here to a predictions table
//! instead of pool snapshots (spec §4.I: "Persistence is the responsibility
//! of an external store; the core exposes only the interface").

use dashmap::DashMap;
use pool_risk::{FeatureVector, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Rug,
    Dump,
    Stable,
    Moon,
    Unknown,
}

impl Outcome {
    /// The binary label the feature-importance correlation is computed
    /// against (spec §4.I: "the binary `outcome ∈ {RUG,DUMP}`").
    fn is_negative_class(&self) -> bool {
        matches!(self, Outcome::Rug | Outcome::Dump)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: u64,
    pub mint: String,
    pub timestamp_ms: u64,
    pub risk_score: f32,
    pub verdict: RiskLevel,
    pub confidence: f32,
    pub features: FeatureVector,
    pub matched_pattern_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub prediction_id: u64,
    pub outcome: Outcome,
    pub price_change: f64,
    pub liquidity_change: f64,
    pub time_to_outcome_ms: u64,
    pub details: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Accuracy {
    pub overall: f64,
    pub per_class: HashMap<String, f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LearnerStats {
    pub total_predictions: usize,
    pub total_outcomes: usize,
    pub accuracy: Accuracy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature_index: usize,
    pub correlation: f64,
}

/// A human-readable-rationale provider for `recordOutcome` (spec §4.I: "may
/// optionally invoke an external LLM"). Out of scope per spec.md §1 beyond
/// this interface seam — no implementation is shipped.
#[async_trait::async_trait]
pub trait RationaleProvider: Send + Sync {
    async fn rationale(&self, prediction: &Prediction, outcome: &OutcomeRecord) -> Option<String>;
}

pub struct OutcomeLearner {
    predictions: DashMap<u64, Prediction>,
    outcomes: DashMap<u64, OutcomeRecord>,
    next_id: AtomicU64,
    rationale_provider: Option<std::sync::Arc<dyn RationaleProvider>>,
}

impl OutcomeLearner {
    pub fn new() -> Self {
        Self {
            predictions: DashMap::new(),
            outcomes: DashMap::new(),
            next_id: AtomicU64::new(1),
            rationale_provider: None,
        }
    }

    pub fn with_rationale_provider(provider: std::sync::Arc<dyn RationaleProvider>) -> Self {
        Self { rationale_provider: Some(provider), ..Self::new() }
    }

    /// `recordPrediction(pred)` -> predictionId.
    pub fn record_prediction(
        &self,
        mint: String,
        timestamp_ms: u64,
        risk_score: f32,
        verdict: RiskLevel,
        confidence: f32,
        features: FeatureVector,
        matched_pattern_ids: Vec<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.predictions.insert(
            id,
            Prediction { prediction_id: id, mint, timestamp_ms, risk_score, verdict, confidence, features, matched_pattern_ids },
        );
        id
    }

    /// `recordOutcome(predictionId, outcome)`. If a rationale provider is
    /// configured and fails, only the numerical outcome is persisted (spec
    /// §4.I).
    pub async fn record_outcome(
        &self,
        prediction_id: u64,
        outcome: Outcome,
        price_change: f64,
        liquidity_change: f64,
        time_to_outcome_ms: u64,
    ) {
        let mut record =
            OutcomeRecord { prediction_id, outcome, price_change, liquidity_change, time_to_outcome_ms, details: None };

        if let Some(provider) = &self.rationale_provider {
            if let Some(prediction) = self.predictions.get(&prediction_id) {
                record.details = provider.rationale(&prediction, &record).await;
            }
        }
        self.outcomes.insert(prediction_id, record);
    }

    /// `getPendingOutcomes()`: predictions older than `max_age_ms` without a
    /// linked outcome.
    pub fn pending_outcomes(&self, max_age_ms: u64, now_ms: u64) -> Vec<Prediction> {
        self.predictions
            .iter()
            .filter(|entry| {
                !self.outcomes.contains_key(entry.key())
                    && now_ms.saturating_sub(entry.value().timestamp_ms) >= max_age_ms
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// `getStats()`.
    pub fn stats(&self) -> LearnerStats {
        let total_predictions = self.predictions.len();
        let total_outcomes = self.outcomes.len();

        if total_outcomes == 0 {
            return LearnerStats { total_predictions, total_outcomes, accuracy: Accuracy::default() };
        }

        let mut correct = 0usize;
        let mut per_class_totals: HashMap<String, (usize, usize)> = HashMap::new();
        for entry in self.outcomes.iter() {
            let outcome = entry.value();
            let Some(prediction) = self.predictions.get(&outcome.prediction_id) else { continue };
            let predicted_negative = matches!(prediction.verdict, RiskLevel::Dangerous | RiskLevel::Scam);
            let actual_negative = outcome.outcome.is_negative_class();
            let is_correct = predicted_negative == actual_negative;
            if is_correct {
                correct += 1;
            }
            let class = format!("{:?}", outcome.outcome);
            let entry = per_class_totals.entry(class).or_insert((0, 0));
            entry.1 += 1;
            if is_correct {
                entry.0 += 1;
            }
        }

        let overall = correct as f64 / total_outcomes as f64;
        let per_class = per_class_totals
            .into_iter()
            .map(|(class, (correct, total))| (class, correct as f64 / total as f64))
            .collect();

        LearnerStats { total_predictions, total_outcomes, accuracy: Accuracy { overall, per_class } }
    }

    /// `getFeatureImportance()`: Pearson correlation between each feature's
    /// value (across every labeled prediction) and the binary
    /// `outcome ∈ {RUG,DUMP}` label, ranked by absolute magnitude (spec
    /// §4.I).
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let labeled: Vec<(FeatureVector, f64)> = self
            .outcomes
            .iter()
            .filter_map(|entry| {
                let prediction = self.predictions.get(&entry.value().prediction_id)?;
                let label = if entry.value().outcome.is_negative_class() { 1.0 } else { 0.0 };
                Some((prediction.features, label))
            })
            .collect();

        if labeled.len() < 2 {
            return Vec::new();
        }

        let n = labeled.len();
        let mean_label = labeled.iter().map(|(_, l)| l).sum::<f64>() / n as f64;

        let mut out = Vec::with_capacity(pool_risk::FEATURE_COUNT);
        for idx in 0..pool_risk::FEATURE_COUNT {
            let values: Vec<f64> = labeled.iter().map(|(f, _)| f[idx] as f64).collect();
            let mean_value = values.iter().sum::<f64>() / n as f64;

            let mut cov = 0.0;
            let mut var_value = 0.0;
            let mut var_label = 0.0;
            for (i, (_, label)) in labeled.iter().enumerate() {
                let dv = values[i] - mean_value;
                let dl = label - mean_label;
                cov += dv * dl;
                var_value += dv * dv;
                var_label += dl * dl;
            }

            let denom = (var_value * var_label).sqrt();
            let correlation = if denom > f64::EPSILON { cov / denom } else { 0.0 };
            out.push(FeatureImportance { feature_index: idx, correlation });
        }

        out.sort_by(|a, b| b.correlation.abs().partial_cmp(&a.correlation.abs()).unwrap());
        out
    }
}

impl Default for OutcomeLearner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features_with(value_at: usize, value: f32) -> FeatureVector {
        let mut f = [0.0f32; pool_risk::FEATURE_COUNT];
        f[value_at] = value;
        f
    }

    #[tokio::test]
    async fn record_prediction_and_outcome_round_trip() {
        let learner = OutcomeLearner::new();
        let id = learner.record_prediction(
            "mint".into(),
            0,
            0.9,
            RiskLevel::Scam,
            0.8,
            features_with(0, 1.0),
            vec!["rugscript".into()],
        );
        learner.record_outcome(id, Outcome::Rug, -0.9, -0.8, 60_000).await;

        let stats = learner.stats();
        assert_eq!(stats.total_predictions, 1);
        assert_eq!(stats.total_outcomes, 1);
        assert_eq!(stats.accuracy.overall, 1.0);
    }

    #[tokio::test]
    async fn pending_outcomes_excludes_linked_predictions() {
        let learner = OutcomeLearner::new();
        let id1 = learner.record_prediction("a".into(), 0, 0.1, RiskLevel::Safe, 0.5, features_with(0, 0.0), vec![]);
        let _id2 = learner.record_prediction("b".into(), 0, 0.1, RiskLevel::Safe, 0.5, features_with(0, 0.0), vec![]);
        learner.record_outcome(id1, Outcome::Stable, 0.0, 0.0, 1_000).await;

        let pending = learner.pending_outcomes(0, 10_000);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].mint, "b");
    }

    #[tokio::test]
    async fn feature_importance_detects_correlated_feature() {
        let learner = OutcomeLearner::new();
        for i in 0..6u64 {
            let is_rug = i % 2 == 0;
            let id = learner.record_prediction(
                format!("mint{i}"),
                0,
                0.5,
                RiskLevel::Safe,
                0.5,
                features_with(0, if is_rug { 1.0 } else { 0.0 }),
                vec![],
            );
            let outcome = if is_rug { Outcome::Rug } else { Outcome::Moon };
            learner.record_outcome(id, outcome, 0.0, 0.0, 0).await;
        }

        let importance = learner.feature_importance();
        assert_eq!(importance[0].feature_index, 0);
        assert!(importance[0].correlation.abs() > 0.9);
    }
}
