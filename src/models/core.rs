// src/models/core.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::errors::DedupError;

fn default_occurrence_count() -> u64 {
    1
}

/// One product line as harvested from a single establishment's purchase records.
/// Owned by the storage collaborator; the engine never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProductRecord {
    pub id: String,
    pub establishment_id: String,
    #[serde(default)]
    pub local_code: Option<String>,
    pub local_description: String,
    #[serde(default)]
    pub local_unit: Option<String>,
    #[serde(default = "default_occurrence_count")]
    pub occurrence_count: u64,
    #[serde(default)]
    pub known_prices: Vec<f64>,
}

impl RawProductRecord {
    pub fn new(id: &str, establishment_id: &str, local_description: &str) -> Self {
        Self {
            id: id.to_string(),
            establishment_id: establishment_id.to_string(),
            local_code: None,
            local_description: local_description.to_string(),
            local_unit: None,
            occurrence_count: 1,
            known_prices: Vec::new(),
        }
    }
}

/// Physical dimension a canonical unit measures. Records of incompatible
/// classes never end up in the same master product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
    Weight,
    Volume,
    Count,
}

impl UnitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitClass::Weight => "weight",
            UnitClass::Volume => "volume",
            UnitClass::Count => "count",
        }
    }
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical view of a description, derived fresh every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatures {
    /// Stopword-free tokens in first-seen order, without repeats.
    pub tokens: Vec<String>,
    /// `tokens` joined by single spaces; input of the edit-distance metric.
    pub normalized_text: String,
    pub quantity: Option<f64>,
    pub unit_canonical: Option<String>,
    /// Number of items in multipack forms such as "12 x 350ml".
    pub pack_count: Option<u32>,
    pub brand_guess: Option<String>,
    pub category_guess: String,
}

impl NormalizedFeatures {
    pub fn token_set(&self) -> HashSet<&str> {
        self.tokens.iter().map(String::as_str).collect()
    }

    pub fn first_token(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// True when both quantity and unit were recovered.
    pub fn has_full_measure(&self) -> bool {
        self.quantity.is_some() && self.unit_canonical.is_some()
    }
}

/// A raw record paired with its features, as carried through one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub record: RawProductRecord,
    pub features: NormalizedFeatures,
    pub unit_class: Option<UnitClass>,
}

impl NormalizedRecord {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Unordered pair of record ids, stored with `record_id_a < record_id_b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub record_id_a: String,
    pub record_id_b: String,
}

impl PairKey {
    pub fn new(x: &str, y: &str) -> Self {
        if x <= y {
            Self {
                record_id_a: x.to_string(),
                record_id_b: y.to_string(),
            }
        } else {
            Self {
                record_id_a: y.to_string(),
                record_id_b: x.to_string(),
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record_id_a == id || self.record_id_b == id
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.record_id_a, self.record_id_b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub pair: PairKey,
    /// Block that produced the pair, or `shared_tokens:<n>` for the secondary pass.
    pub blocking_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMethod {
    RuleBased,
    Hybrid,
    Classifier,
}

impl ScoreMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMethod::RuleBased => "rule_based",
            ScoreMethod::Hybrid => "hybrid",
            ScoreMethod::Classifier => "classifier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub pair: PairKey,
    pub metric_breakdown: BTreeMap<String, f64>,
    pub combined_score: f64,
    pub method: ScoreMethod,
}

impl SimilarityScore {
    /// Builds a score, rejecting any metric or combined value outside [0, 1].
    pub fn new(
        pair: PairKey,
        metric_breakdown: BTreeMap<String, f64>,
        combined_score: f64,
        method: ScoreMethod,
    ) -> Result<Self, DedupError> {
        check_unit_interval("combined_score", combined_score)?;
        for (name, value) in &metric_breakdown {
            check_unit_interval(name, *value)?;
        }
        Ok(Self {
            pair,
            metric_breakdown,
            combined_score,
            method,
        })
    }
}

pub(crate) fn check_unit_interval(name: &str, value: f64) -> Result<(), DedupError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DedupError::InvalidScore {
            name: name.to_string(),
            value,
        })
    }
}

/// An edge whose union contributed to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEdge {
    pub pair: PairKey,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Sorted member ids.
    pub record_ids: Vec<String>,
    pub unit_class: Option<UnitClass>,
    /// Scores backing the cluster: the surviving unioned edges, or the pairwise
    /// similarities of members left together by a coherence split.
    pub supporting_edges: Vec<MergeEdge>,
    pub split_from_incoherent: bool,
}

impl Cluster {
    pub fn singleton(record_id: &str, unit_class: Option<UnitClass>) -> Self {
        Self {
            record_ids: vec![record_id.to_string()],
            unit_class,
            supporting_edges: Vec::new(),
            split_from_incoherent: false,
        }
    }

    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterProduct {
    pub master_id: String,
    pub canonical_description: String,
    pub alternative_descriptions: BTreeSet<String>,
    pub category: String,
    pub brand: Option<String>,
    /// `None` when contributors disagree on the canonical unit.
    pub unit: Option<String>,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub price_variance: Option<f64>,
    pub total_occurrences: u64,
    pub establishments_count: usize,
    pub confidence_score: f64,
    pub quality_score: f64,
    pub contributing_record_ids: Vec<String>,
}

/// One row of the raw → master mapping table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRow {
    pub raw_id: String,
    pub master_id: String,
    pub establishment_id: String,
    pub original_description: String,
    pub normalized_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairLabel {
    Same,
    Different,
}

impl PairLabel {
    pub fn as_reward(&self) -> f64 {
        match self {
            PairLabel::Same => 1.0,
            PairLabel::Different => 0.0,
        }
    }
}

/// A human adjudication of a pair. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub pair: PairKey,
    pub label: PairLabel,
    pub feature_snapshot: BTreeMap<String, f64>,
    pub labeled_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewer_id: Option<String>,
}

impl TrainingExample {
    pub fn new(score: &SimilarityScore, label: PairLabel, reviewer_id: Option<String>) -> Self {
        Self {
            pair: score.pair.clone(),
            label,
            feature_snapshot: score.metric_breakdown.clone(),
            labeled_at: Utc::now(),
            reviewer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_ordered() {
        let forward = PairKey::new("r1", "r2");
        let backward = PairKey::new("r2", "r1");
        assert_eq!(forward, backward);
        assert_eq!(forward.record_id_a, "r1");
        assert!(forward.contains("r2"));
    }

    #[test]
    fn test_similarity_score_rejects_out_of_range() {
        let pair = PairKey::new("a", "b");
        assert!(SimilarityScore::new(pair.clone(), BTreeMap::new(), 1.2, ScoreMethod::RuleBased).is_err());

        let mut breakdown = BTreeMap::new();
        breakdown.insert("token_jaccard".to_string(), -0.1);
        assert!(SimilarityScore::new(pair.clone(), breakdown, 0.5, ScoreMethod::RuleBased).is_err());

        assert!(SimilarityScore::new(pair, BTreeMap::new(), f64::NAN, ScoreMethod::RuleBased).is_err());
    }

    #[test]
    fn test_raw_record_defaults_on_deserialize() {
        let json = r#"{"id":"1","establishment_id":"e1","local_description":"ARROZ 5KG"}"#;
        let record: RawProductRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.occurrence_count, 1);
        assert!(record.known_prices.is_empty());
        assert!(record.local_unit.is_none());
    }
}
