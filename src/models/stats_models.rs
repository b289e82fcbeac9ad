// src/models/stats_models.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::DedupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    MalformedRecord,
    UnitIncompatibility,
    CoherenceSplit,
    UnitDisagreement,
}

/// An entry in the manual-review queue. Nothing in the queue is auto-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub kind: ReviewKind,
    pub record_ids: Vec<String>,
    pub score: Option<f64>,
    pub message: String,
}

impl ReviewItem {
    /// Routes a non-fatal engine error into a review item.
    pub fn from_error(err: &DedupError, score: Option<f64>) -> Option<Self> {
        match err {
            DedupError::MalformedRecord { record_id, .. } => Some(Self {
                kind: ReviewKind::MalformedRecord,
                record_ids: vec![record_id.clone()],
                score,
                message: err.to_string(),
            }),
            DedupError::UnitIncompatibility {
                record_id_a,
                record_id_b,
                ..
            } => Some(Self {
                kind: ReviewKind::UnitIncompatibility,
                record_ids: vec![record_id_a.clone(), record_id_b.clone()],
                score,
                message: err.to_string(),
            }),
            _ => None,
        }
    }

    pub fn coherence_split(
        record_ids: Vec<String>,
        evicted: Vec<String>,
        min_similarity: f64,
        floor: f64,
    ) -> Self {
        Self {
            kind: ReviewKind::CoherenceSplit,
            message: format!(
                "minimum internal similarity {:.3} below coherence floor {:.2}; split off [{}]",
                min_similarity,
                floor,
                evicted.join(", ")
            ),
            record_ids,
            score: Some(min_similarity),
        }
    }

    pub fn unit_disagreement(record_ids: Vec<String>, units: &[String]) -> Self {
        Self {
            kind: ReviewKind::UnitDisagreement,
            record_ids,
            score: None,
            message: format!("contributors disagree on canonical unit: {}", units.join(", ")),
        }
    }

    /// Deterministic queue order: kind, then member ids, then message.
    pub fn sort_key(&self) -> (ReviewKind, &[String], &str) {
        (self.kind, self.record_ids.as_slice(), self.message.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub total_descriptions: usize,
    pub unique_originals: usize,
    pub unique_normalized: usize,
    /// Share of distinct originals collapsed by normalization alone.
    pub reduction_ratio: f64,
    pub brands_detected: usize,
    pub categories_detected: usize,
    pub avg_token_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingStats {
    pub block_count: usize,
    pub avg_block_size: f64,
    pub max_block_size: usize,
    pub oversized_blocks: usize,
    pub blocking_pairs: usize,
    pub secondary_pairs: usize,
    pub skipped_common_tokens: usize,
    pub total_pairs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub dedup_rate: f64,
    pub total_raw_records: usize,
    pub clustered_records: usize,
    pub skipped_records: usize,
    pub total_master_products: usize,
    pub cross_establishment_products: usize,
    pub avg_confidence: f64,
    pub avg_quality: f64,
    pub low_confidence_count: usize,
    pub confidence_histogram: Vec<HistogramBucket>,
    pub manual_review_queue: Vec<ReviewItem>,
    pub category_distribution: BTreeMap<String, usize>,
    pub unit_distribution: BTreeMap<String, usize>,
    pub normalization: NormalizationStats,
    pub blocking: BlockingStats,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::UnitClass;

    #[test]
    fn test_review_item_from_errors() {
        let malformed = DedupError::MalformedRecord {
            record_id: "r9".to_string(),
            reason: "empty description".to_string(),
        };
        let item = ReviewItem::from_error(&malformed, None).unwrap();
        assert_eq!(item.kind, ReviewKind::MalformedRecord);
        assert_eq!(item.record_ids, vec!["r9".to_string()]);

        let clash = DedupError::UnitIncompatibility {
            record_id_a: "a".to_string(),
            record_id_b: "b".to_string(),
            class_a: UnitClass::Weight,
            class_b: UnitClass::Count,
        };
        let item = ReviewItem::from_error(&clash, Some(0.91)).unwrap();
        assert_eq!(item.kind, ReviewKind::UnitIncompatibility);
        assert!(item.message.contains("weight"));

        let fatal = DedupError::StorageUnavailable("down".to_string());
        assert!(ReviewItem::from_error(&fatal, None).is_none());
    }
}
