// src/utils/config.rs
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::candidate_generation::candidate_generation::BlockingStrategy;
use crate::errors::DedupError;
use crate::matching::BlendPolicy;
use crate::models::UnitClass;
use crate::normalization::dictionaries::{
    default_abbreviations, default_brands, default_categories, default_stopwords,
    default_unit_classes, default_unit_table, CategoryKeywords,
};
use crate::utils::env::env_or;

/// Weights of the rule-based metrics. Re-normalized over the metrics present for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub token_jaccard: f64,
    pub edit_distance: f64,
    pub quantity_match: f64,
    pub unit_match: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            token_jaccard: 0.4,
            edit_distance: 0.3,
            quantity_match: 0.2,
            unit_match: 0.1,
        }
    }
}

impl MetricWeights {
    pub fn as_pairs(&self) -> [(&'static str, f64); 4] {
        [
            ("token_jaccard", self.token_jaccard),
            ("edit_distance", self.edit_distance),
            ("quantity_match", self.quantity_match),
            ("unit_match", self.unit_match),
        ]
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.as_pairs()
            .iter()
            .find(|(name, _)| *name == metric)
            .map(|(_, w)| *w)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub strategy: BlockingStrategy,
    /// Pair records sharing at least this many tokens regardless of block.
    pub secondary_pass: bool,
    pub min_shared_tokens: usize,
    /// Tokens with more postings than this are too common to pair on.
    pub max_token_postings: usize,
    pub block_size_warning: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            strategy: BlockingStrategy::default(),
            secondary_pass: true,
            min_shared_tokens: 2,
            max_token_postings: 1000,
            block_size_warning: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveLearningConfig {
    pub band_low: f64,
    pub band_high: f64,
    pub batch_size: usize,
    pub min_examples: usize,
    pub holdout_fraction: f64,
    pub epochs: usize,
    pub learning_rate: f64,
    pub training_store_path: PathBuf,
    pub model_path: PathBuf,
    /// Blend a saved classifier into the scorer when the model file exists.
    pub use_classifier: bool,
}

impl Default for ActiveLearningConfig {
    fn default() -> Self {
        Self {
            band_low: 0.4,
            band_high: 0.7,
            batch_size: 20,
            min_examples: 10,
            holdout_fraction: 0.2,
            epochs: 200,
            learning_rate: 0.1,
            training_store_path: PathBuf::from("data/training_examples.jsonl"),
            model_path: PathBuf::from("data/pair_classifier.json"),
            use_classifier: false,
        }
    }
}

/// Every tunable of a deduplication run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub threshold: f64,
    pub coherence_floor: f64,
    pub weights: MetricWeights,
    /// Lowercase, accent-free abbreviation → canonical unit.
    pub unit_standardization_table: BTreeMap<String, String>,
    pub unit_classes: BTreeMap<String, UnitClass>,
    /// Pairs of distinct unit classes that may share a cluster. Empty means none may.
    pub compatible_unit_classes: Vec<(UnitClass, UnitClass)>,
    pub brands: Vec<String>,
    pub categories: Vec<CategoryKeywords>,
    pub stopwords: Vec<String>,
    /// Receipt shorthand → full word, matched on whole words after folding.
    pub abbreviations: BTreeMap<String, String>,
    pub blocking: BlockingConfig,
    pub blend_policy: BlendPolicy,
    pub coverage_penalty: f64,
    pub active_learning: ActiveLearningConfig,
    pub histogram_buckets: usize,
    pub low_confidence_threshold: f64,
    pub feature_cache_size: usize,
    /// 0 means one worker per CPU.
    pub worker_threads: usize,
    pub checkpoint_dir: Option<PathBuf>,
    pub run_timeout_secs: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            coherence_floor: 0.6,
            weights: MetricWeights::default(),
            unit_standardization_table: default_unit_table(),
            unit_classes: default_unit_classes(),
            compatible_unit_classes: Vec::new(),
            brands: default_brands(),
            categories: default_categories(),
            stopwords: default_stopwords(),
            abbreviations: default_abbreviations(),
            blocking: BlockingConfig::default(),
            blend_policy: BlendPolicy::default(),
            coverage_penalty: 0.2,
            active_learning: ActiveLearningConfig::default(),
            histogram_buckets: 10,
            low_confidence_threshold: 0.7,
            feature_cache_size: 50_000,
            worker_threads: 0,
            checkpoint_dir: None,
            run_timeout_secs: None,
        }
    }
}

impl DedupConfig {
    /// Defaults, overlaid by the JSON file at `DEDUP_CONFIG_PATH` (if set), then by
    /// individual environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("DEDUP_CONFIG_PATH") {
            Ok(path) => Self::from_json_file(&path)?,
            Err(_) => Self::default(),
        };

        config.threshold = env_or("DEDUP_THRESHOLD", config.threshold);
        config.coherence_floor = env_or("DEDUP_COHERENCE_FLOOR", config.coherence_floor);
        config.coverage_penalty = env_or("DEDUP_COVERAGE_PENALTY", config.coverage_penalty);
        config.feature_cache_size = env_or("FEATURE_CACHE_SIZE", config.feature_cache_size);
        config.worker_threads = env_or("WORKER_THREADS", config.worker_threads);
        if let Ok(policy) = std::env::var("DEDUP_BLEND_POLICY") {
            config.blend_policy = policy.parse().map_err(DedupError::InvalidConfig)?;
        }
        if let Ok(strategy) = std::env::var("BLOCKING_STRATEGY") {
            config.blocking.strategy = strategy.parse().map_err(DedupError::InvalidConfig)?;
        }
        if let Ok(secs) = std::env::var("RUN_TIMEOUT_SECS") {
            config.run_timeout_secs = secs.trim().parse().ok();
        }
        if let Ok(dir) = std::env::var("CHECKPOINT_DIR") {
            config.checkpoint_dir = Some(PathBuf::from(dir));
        }
        if let Ok(path) = std::env::var("TRAINING_STORE_PATH") {
            config.active_learning.training_store_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CLASSIFIER_MODEL_PATH") {
            config.active_learning.model_path = PathBuf::from(path);
        }
        config.active_learning.use_classifier =
            env_or("USE_CLASSIFIER", config.active_learning.use_classifier);

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DedupError> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.threshold) {
            return Err(DedupError::InvalidConfig(format!(
                "threshold {} must lie in [0, 1]",
                self.threshold
            )));
        }
        if !in_unit(self.coherence_floor) {
            return Err(DedupError::InvalidConfig(format!(
                "coherence_floor {} must lie in [0, 1]",
                self.coherence_floor
            )));
        }
        if !in_unit(self.coverage_penalty) {
            return Err(DedupError::InvalidConfig(format!(
                "coverage_penalty {} must lie in [0, 1]",
                self.coverage_penalty
            )));
        }
        let pairs = self.weights.as_pairs();
        if let Some((name, w)) = pairs.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(DedupError::InvalidConfig(format!(
                "weight for {} must be non-negative, got {}",
                name, w
            )));
        }
        if pairs.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
            return Err(DedupError::InvalidConfig(
                "metric weights must have a positive sum".to_string(),
            ));
        }
        let al = &self.active_learning;
        if !in_unit(al.band_low) || !in_unit(al.band_high) || al.band_low >= al.band_high {
            return Err(DedupError::InvalidConfig(format!(
                "uncertainty band [{}, {}] is not a valid sub-interval of [0, 1]",
                al.band_low, al.band_high
            )));
        }
        if !(0.0..1.0).contains(&al.holdout_fraction) {
            return Err(DedupError::InvalidConfig(format!(
                "holdout_fraction {} must lie in [0, 1)",
                al.holdout_fraction
            )));
        }
        if self.histogram_buckets == 0 {
            return Err(DedupError::InvalidConfig(
                "histogram_buckets must be at least 1".to_string(),
            ));
        }
        if self.feature_cache_size == 0 {
            return Err(DedupError::InvalidConfig(
                "feature_cache_size must be at least 1".to_string(),
            ));
        }
        if self.blocking.min_shared_tokens == 0 {
            return Err(DedupError::InvalidConfig(
                "min_shared_tokens must be at least 1".to_string(),
            ));
        }
        for (abbrev, canonical) in &self.unit_standardization_table {
            if !self.unit_classes.contains_key(canonical) {
                warn!(
                    "Canonical unit {} (from '{}') has no unit class; records using it are class-less",
                    canonical, abbrev
                );
            }
        }
        Ok(())
    }

    pub fn unit_class_of(&self, canonical_unit: &str) -> Option<UnitClass> {
        self.unit_classes.get(canonical_unit).copied()
    }

    pub fn classes_compatible(&self, a: UnitClass, b: UnitClass) -> bool {
        a == b
            || self
                .compatible_unit_classes
                .iter()
                .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }

    pub fn log_config(&self) {
        info!("⚙️  Deduplication configuration");
        info!(
            "   threshold={:.2} coherence_floor={:.2} blend={:?} coverage_penalty={:.2}",
            self.threshold, self.coherence_floor, self.blend_policy, self.coverage_penalty
        );
        info!(
            "   weights: jaccard={:.2} edit={:.2} quantity={:.2} unit={:.2}",
            self.weights.token_jaccard,
            self.weights.edit_distance,
            self.weights.quantity_match,
            self.weights.unit_match
        );
        info!(
            "   blocking: {:?}, secondary pass {} (min shared tokens {}, max postings {})",
            self.blocking.strategy,
            if self.blocking.secondary_pass { "on" } else { "off" },
            self.blocking.min_shared_tokens,
            self.blocking.max_token_postings
        );
        info!(
            "   dictionaries: {} unit abbreviations, {} word abbreviations, {} brands, {} categories, {} stopwords",
            self.unit_standardization_table.len(),
            self.abbreviations.len(),
            self.brands.len(),
            self.categories.len(),
            self.stopwords.len()
        );
        info!(
            "   active learning: band [{:.2}, {:.2}], batch {}, min examples {}",
            self.active_learning.band_low,
            self.active_learning.band_high,
            self.active_learning.batch_size,
            self.active_learning.min_examples
        );
        match &self.checkpoint_dir {
            Some(dir) => info!("   checkpoints: {}", dir.display()),
            None => info!("   checkpoints: disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DedupConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.coherence_floor, 0.6);
        assert_eq!(config.weights.get("token_jaccard"), Some(0.4));
        assert_eq!(config.unit_class_of("KG"), Some(UnitClass::Weight));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DedupConfig::default();
        config.threshold = 1.5;
        assert!(matches!(config.validate(), Err(DedupError::InvalidConfig(_))));

        let mut config = DedupConfig::default();
        config.weights.edit_distance = -0.1;
        assert!(config.validate().is_err());

        let mut config = DedupConfig::default();
        config.weights = MetricWeights {
            token_jaccard: 0.0,
            edit_distance: 0.0,
            quantity_match: 0.0,
            unit_match: 0.0,
        };
        assert!(config.validate().is_err());

        let mut config = DedupConfig::default();
        config.active_learning.band_low = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_overrides_keep_defaults() {
        let json = r#"{"threshold": 0.85, "weights": {"unit_match": 0.3}, "blend_policy": "mean"}"#;
        let config: DedupConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.threshold, 0.85);
        assert_eq!(config.weights.unit_match, 0.3);
        assert_eq!(config.weights.token_jaccard, 0.4);
        assert_eq!(config.blend_policy, BlendPolicy::Mean);
        assert_eq!(config.coherence_floor, 0.6);
        assert!(!config.brands.is_empty());
    }

    #[test]
    fn test_unit_class_compatibility() {
        let mut config = DedupConfig::default();
        assert!(config.classes_compatible(UnitClass::Weight, UnitClass::Weight));
        assert!(!config.classes_compatible(UnitClass::Weight, UnitClass::Count));

        config.compatible_unit_classes = vec![(UnitClass::Count, UnitClass::Weight)];
        assert!(config.classes_compatible(UnitClass::Weight, UnitClass::Count));
        assert!(!config.classes_compatible(UnitClass::Volume, UnitClass::Count));
    }
}
