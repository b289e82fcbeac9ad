// src/matching/mod.rs
pub mod embedding;
pub mod manager;
pub mod scorer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::errors::DedupError;
use crate::models::{NormalizedRecord, PairKey, ScoreMethod, SimilarityScore};
use crate::utils::config::DedupConfig;
use scorer::{local_codes_match, RuleBasedScorer, LOCAL_CODE_MATCH};

/// A second similarity signal layered over the rule-based score
/// (semantic embeddings, a trained classifier).
pub trait SupplementalScorer: Send + Sync {
    /// Key under which the signal is recorded in `metric_breakdown`.
    fn metric_name(&self) -> &'static str;

    fn method(&self) -> ScoreMethod;

    /// Similarity in [0, 1], or None when the signal is unavailable for this pair.
    fn score(
        &self,
        a: &NormalizedRecord,
        b: &NormalizedRecord,
        rule_breakdown: &BTreeMap<String, f64>,
    ) -> Option<f64>;
}

/// How a supplemental signal combines with the rule-based score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendPolicy {
    /// Either signal alone finding high similarity is enough.
    #[default]
    Max,
    Mean,
    /// The supplemental signal replaces the rule-based score.
    Replace,
}

impl BlendPolicy {
    pub fn blend(&self, rule_score: f64, supplemental: f64) -> f64 {
        let blended = match self {
            BlendPolicy::Max => rule_score.max(supplemental),
            BlendPolicy::Mean => (rule_score + supplemental) / 2.0,
            BlendPolicy::Replace => supplemental,
        };
        blended.clamp(0.0, 1.0)
    }
}

impl FromStr for BlendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(BlendPolicy::Max),
            "mean" => Ok(BlendPolicy::Mean),
            "replace" => Ok(BlendPolicy::Replace),
            other => Err(format!("unknown blend policy '{}'", other)),
        }
    }
}

/// Pairwise scorer used for a whole run: rule-based metrics plus at most one
/// supplemental signal.
pub struct SimilarityScorer {
    rules: RuleBasedScorer,
    supplemental: Option<Box<dyn SupplementalScorer>>,
    blend: BlendPolicy,
}

impl SimilarityScorer {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            rules: RuleBasedScorer::new(config.weights.clone()),
            supplemental: None,
            blend: config.blend_policy,
        }
    }

    pub fn with_supplemental(mut self, supplemental: Box<dyn SupplementalScorer>) -> Self {
        self.supplemental = Some(supplemental);
        self
    }

    /// Scores a pair. Inputs are put in canonical id order first, so
    /// `score(a, b)` and `score(b, a)` are identical.
    pub fn score(
        &self,
        x: &NormalizedRecord,
        y: &NormalizedRecord,
    ) -> Result<SimilarityScore, DedupError> {
        let (a, b) = if x.id() <= y.id() { (x, y) } else { (y, x) };
        let pair = PairKey::new(a.id(), b.id());
        let mut breakdown = self.rules.breakdown(a, b);

        if local_codes_match(a, b) {
            breakdown.insert(LOCAL_CODE_MATCH.to_string(), 1.0);
            return SimilarityScore::new(pair, breakdown, 1.0, ScoreMethod::RuleBased);
        }

        let rule_score = self.rules.combine(&breakdown);
        let mut combined = rule_score;
        let mut method = ScoreMethod::RuleBased;
        if let Some(supplemental) = &self.supplemental {
            if let Some(signal) = supplemental.score(a, b, &breakdown) {
                let signal = signal.clamp(0.0, 1.0);
                breakdown.insert(supplemental.metric_name().to_string(), signal);
                combined = self.blend.blend(rule_score, signal);
                method = supplemental.method();
            }
        }

        SimilarityScore::new(pair, breakdown, combined, method)
    }

    /// Combined score only; used when recomputing a pair that was never a candidate.
    pub fn score_value(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> f64 {
        self.score(a, b).map(|s| s.combined_score).unwrap_or(0.0)
    }
}
