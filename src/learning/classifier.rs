// src/learning/classifier.rs
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::DedupError;
use crate::matching::scorer::{EDIT_DISTANCE, QUANTITY_MATCH, TOKEN_JACCARD, UNIT_MATCH};
use crate::matching::SupplementalScorer;
use crate::models::{NormalizedRecord, PairLabel, ScoreMethod, TrainingExample};
use crate::utils::config::ActiveLearningConfig;

pub const CLASSIFIER_PROBABILITY: &str = "classifier_probability";
/// token_jaccard, edit_distance, quantity_match, unit_match, has_quantity, has_unit
pub const PAIR_FEATURE_COUNT: usize = 6;
const SHUFFLE_SEED: u64 = 42;
/// Stand-in for an optional metric that could not be computed.
const MISSING_METRIC: f64 = 0.5;

/// Fixed-length feature vector from a metric breakdown.
pub fn pair_features(breakdown: &BTreeMap<String, f64>) -> [f64; PAIR_FEATURE_COUNT] {
    let get = |key: &str| breakdown.get(key).copied();
    let quantity = get(QUANTITY_MATCH);
    let unit = get(UNIT_MATCH);
    [
        get(TOKEN_JACCARD).unwrap_or(0.0),
        get(EDIT_DISTANCE).unwrap_or(0.0),
        quantity.unwrap_or(MISSING_METRIC),
        unit.unwrap_or(MISSING_METRIC),
        if quantity.is_some() { 1.0 } else { 0.0 },
        if unit.is_some() { 1.0 } else { 0.0 },
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl EvaluationMetrics {
    /// Metrics of `predicted` against `actual`, where true means "same product".
    pub fn from_predictions(pairs: impl Iterator<Item = (bool, bool)>) -> Self {
        let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
        for (predicted, actual) in pairs {
            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }
        let support = tp + fp + tn + fn_;
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            accuracy: ratio(tp + tn, support),
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Logistic regression over pair features, trained by gradient descent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairClassifier {
    /// Feature weights followed by the bias term.
    weights: Vec<f64>,
    learning_rate: f64,
    trials: usize,
    pub version: u32,
    pub trained_at: Option<DateTime<Utc>>,
    pub training_examples: usize,
    pub holdout_metrics: Option<EvaluationMetrics>,
}

impl PairClassifier {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            weights: vec![0.0; PAIR_FEATURE_COUNT + 1],
            learning_rate,
            trials: 0,
            version: 0,
            trained_at: None,
            training_examples: 0,
            holdout_metrics: None,
        }
    }

    /// Probability that the pair is the same product.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != PAIR_FEATURE_COUNT {
            warn!(
                "Expected {} pair features, got {}; returning neutral probability",
                PAIR_FEATURE_COUNT,
                features.len()
            );
            return 0.5;
        }
        let logit: f64 = self
            .weights
            .iter()
            .zip(features.iter().chain(std::iter::once(&1.0)))
            .map(|(w, f)| w * f)
            .sum();
        1.0 / (1.0 + (-logit).exp())
    }

    pub fn update(&mut self, features: &[f64], reward: f64) {
        if features.len() != PAIR_FEATURE_COUNT {
            warn!("Skipping classifier update due to feature vector length mismatch");
            return;
        }
        let error = reward - self.predict(features);
        for (i, value) in features.iter().enumerate() {
            self.weights[i] += self.learning_rate * error * value;
        }
        let bias = self.weights.len() - 1;
        self.weights[bias] += self.learning_rate * error;
        self.trials += 1;
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn evaluate(&self, examples: &[&TrainingExample]) -> EvaluationMetrics {
        EvaluationMetrics::from_predictions(examples.iter().map(|ex| {
            let p = self.predict(&pair_features(&ex.feature_snapshot));
            (p >= 0.5, ex.label == PairLabel::Same)
        }))
    }

    /// Writes the model as JSON, bumping its version.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.version += 1;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create model directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&*self).context("Failed to serialize PairClassifier")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write model to {}", path.display()))?;
        info!("Saved pair classifier (v{}) to {}", self.version, path.display());
        Ok(())
    }

    /// Loads a saved model; `None` when there is no file yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            info!("No pair classifier at {}; rule-based scoring only", path.display());
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        let model: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse model {}", path.display()))?;
        if model.weights.len() != PAIR_FEATURE_COUNT + 1 {
            return Err(anyhow!(
                "Model {} has {} weights, expected {}",
                path.display(),
                model.weights.len(),
                PAIR_FEATURE_COUNT + 1
            ));
        }
        info!(
            "Loaded pair classifier (v{}, {} training examples) from {}",
            model.version,
            model.training_examples,
            path.display()
        );
        Ok(Some(model))
    }
}

/// Trains a fresh classifier on labeled pairs, holding out a seeded random
/// split for evaluation. Same input, same model.
pub fn train_classifier(
    examples: &[TrainingExample],
    config: &ActiveLearningConfig,
) -> Result<PairClassifier, DedupError> {
    if examples.len() < config.min_examples {
        return Err(DedupError::TrainingDataInsufficient {
            required: config.min_examples,
            available: examples.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    let mut order: Vec<usize> = (0..examples.len()).collect();
    order.shuffle(&mut rng);

    let holdout_len = ((examples.len() as f64 * config.holdout_fraction).round() as usize)
        .min(examples.len().saturating_sub(1));
    let (holdout_idx, train_idx) = order.split_at(holdout_len);
    let mut train: Vec<&TrainingExample> = train_idx.iter().map(|&i| &examples[i]).collect();
    let holdout: Vec<&TrainingExample> = holdout_idx.iter().map(|&i| &examples[i]).collect();

    let mut model = PairClassifier::new(config.learning_rate);
    for epoch in 0..config.epochs {
        train.shuffle(&mut rng);
        for ex in &train {
            model.update(&pair_features(&ex.feature_snapshot), ex.label.as_reward());
        }
        if epoch % 50 == 0 {
            debug!("Epoch {}: training accuracy {:.3}", epoch, model.evaluate(&train).accuracy);
        }
    }

    model.training_examples = train.len();
    model.trained_at = Some(Utc::now());
    model.holdout_metrics = (!holdout.is_empty()).then(|| model.evaluate(&holdout));
    match &model.holdout_metrics {
        Some(m) => info!(
            "Trained pair classifier on {} examples; holdout ({}) accuracy {:.3} precision {:.3} recall {:.3} F1 {:.3}",
            train.len(),
            m.support,
            m.accuracy,
            m.precision,
            m.recall,
            m.f1
        ),
        None => info!("Trained pair classifier on {} examples; no holdout", train.len()),
    }
    Ok(model)
}

/// Classifier probability as a supplemental similarity signal.
pub struct ClassifierScorer {
    model: PairClassifier,
}

impl ClassifierScorer {
    pub fn new(model: PairClassifier) -> Self {
        Self { model }
    }
}

impl SupplementalScorer for ClassifierScorer {
    fn metric_name(&self) -> &'static str {
        CLASSIFIER_PROBABILITY
    }

    fn method(&self) -> ScoreMethod {
        ScoreMethod::Classifier
    }

    fn score(
        &self,
        _a: &NormalizedRecord,
        _b: &NormalizedRecord,
        rule_breakdown: &BTreeMap<String, f64>,
    ) -> Option<f64> {
        Some(self.model.predict(&pair_features(rule_breakdown)).clamp(0.0, 1.0))
    }
}
