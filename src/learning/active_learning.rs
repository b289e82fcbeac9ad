// src/learning/active_learning.rs
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::learning::classifier::EvaluationMetrics;
use crate::matching::scorer::{RuleBasedScorer, LOCAL_CODE_MATCH};
use crate::models::{NormalizedRecord, PairKey, PairLabel, SimilarityScore, TrainingExample};
use crate::utils::config::{ActiveLearningConfig, MetricWeights};

pub const DEFAULT_SUGGESTED_THRESHOLD: f64 = 0.7;

/// A pair worth showing to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertainPair {
    pub score: SimilarityScore,
    /// 1.0 at the band midpoint, 0.0 at its edges.
    pub uncertainty: f64,
}

/// Picks the scored pairs the engine is least sure about: inside the
/// uncertainty band, closest to its midpoint first, never already labeled.
pub fn select_uncertain_pairs(
    scores: &[SimilarityScore],
    labeled: &HashSet<PairKey>,
    config: &ActiveLearningConfig,
) -> Vec<UncertainPair> {
    let mid = (config.band_low + config.band_high) / 2.0;
    let half_width = (config.band_high - config.band_low) / 2.0;

    let mut candidates: Vec<UncertainPair> = scores
        .iter()
        .filter(|s| s.combined_score >= config.band_low && s.combined_score <= config.band_high)
        .filter(|s| !labeled.contains(&s.pair))
        .map(|s| UncertainPair {
            uncertainty: (1.0 - (s.combined_score - mid).abs() / half_width).clamp(0.0, 1.0),
            score: s.clone(),
        })
        .collect();
    let in_band = candidates.len();

    candidates.sort_by(|x, y| {
        y.uncertainty
            .total_cmp(&x.uncertainty)
            .then_with(|| x.score.pair.cmp(&y.score.pair))
    });
    candidates.truncate(config.batch_size);
    info!(
        "Selected {} of {} in-band pairs for labeling (band {:.2}-{:.2})",
        candidates.len(),
        in_band,
        config.band_low,
        config.band_high
    );
    candidates
}

/// One entry of a batch handed to a reviewer, who fills in `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingTask {
    pub description_a: String,
    pub description_b: String,
    pub uncertainty: f64,
    pub score: SimilarityScore,
    #[serde(default)]
    pub label: Option<PairLabel>,
    #[serde(default)]
    pub reviewer_id: Option<String>,
}

/// Attaches the original descriptions to each selected pair.
pub fn labeling_batch(selected: Vec<UncertainPair>, records: &[NormalizedRecord]) -> Vec<LabelingTask> {
    let descriptions: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.id(), r.record.local_description.as_str()))
        .collect();
    let describe = |id: &str| descriptions.get(id).map(|d| d.to_string()).unwrap_or_default();
    selected
        .into_iter()
        .map(|p| LabelingTask {
            description_a: describe(&p.score.pair.record_id_a),
            description_b: describe(&p.score.pair.record_id_b),
            uncertainty: p.uncertainty,
            score: p.score,
            label: None,
            reviewer_id: None,
        })
        .collect()
}

/// Training examples for the tasks a reviewer has answered; unanswered ones are skipped.
pub fn labeled_examples(tasks: &[LabelingTask]) -> Vec<TrainingExample> {
    tasks
        .iter()
        .filter_map(|t| {
            t.label
                .map(|label| TrainingExample::new(&t.score, label, t.reviewer_id.clone()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSuggestion {
    pub threshold: f64,
    /// `None` when there were too few labels to scan.
    pub metrics: Option<EvaluationMetrics>,
    pub examples_used: usize,
}

/// Rule-based score recomputed from a stored metric breakdown.
fn rule_score(scorer: &RuleBasedScorer, snapshot: &BTreeMap<String, f64>) -> f64 {
    if snapshot.get(LOCAL_CODE_MATCH).copied() == Some(1.0) {
        return 1.0;
    }
    scorer.combine(snapshot)
}

/// Scans thresholds 0.10..=0.95 in 0.05 steps and keeps the one with the best
/// F1 of rule-based scores against the labels. Ties keep the lower threshold.
pub fn suggest_threshold(
    examples: &[TrainingExample],
    weights: &MetricWeights,
    config: &ActiveLearningConfig,
) -> ThresholdSuggestion {
    if examples.len() < config.min_examples {
        info!(
            "Only {} labeled pairs (need {}); suggesting default threshold {:.2}",
            examples.len(),
            config.min_examples,
            DEFAULT_SUGGESTED_THRESHOLD
        );
        return ThresholdSuggestion {
            threshold: DEFAULT_SUGGESTED_THRESHOLD,
            metrics: None,
            examples_used: examples.len(),
        };
    }

    let scorer = RuleBasedScorer::new(weights.clone());
    let scored: Vec<(f64, bool)> = examples
        .iter()
        .map(|ex| (rule_score(&scorer, &ex.feature_snapshot), ex.label == PairLabel::Same))
        .collect();

    let mut best: Option<(f64, EvaluationMetrics)> = None;
    for step in 2..=19 {
        let threshold = step as f64 * 0.05;
        let metrics = EvaluationMetrics::from_predictions(
            scored.iter().map(|&(score, same)| (score >= threshold, same)),
        );
        debug!("Threshold {:.2}: F1 {:.3}", threshold, metrics.f1);
        if best.map_or(true, |(_, b)| metrics.f1 > b.f1) {
            best = Some((threshold, metrics));
        }
    }

    match best {
        Some((threshold, metrics)) => {
            info!(
                "Suggested threshold {:.2} (F1 {:.3}, precision {:.3}, recall {:.3}) from {} labels",
                threshold,
                metrics.f1,
                metrics.precision,
                metrics.recall,
                examples.len()
            );
            ThresholdSuggestion {
                threshold,
                metrics: Some(metrics),
                examples_used: examples.len(),
            }
        }
        None => ThresholdSuggestion {
            threshold: DEFAULT_SUGGESTED_THRESHOLD,
            metrics: None,
            examples_used: examples.len(),
        },
    }
}
