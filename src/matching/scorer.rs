// src/matching/scorer.rs
use std::collections::BTreeMap;

use crate::models::NormalizedRecord;
use crate::utils::config::MetricWeights;

pub const TOKEN_JACCARD: &str = "token_jaccard";
pub const EDIT_DISTANCE: &str = "edit_distance";
pub const QUANTITY_MATCH: &str = "quantity_match";
pub const UNIT_MATCH: &str = "unit_match";
pub const LOCAL_CODE_MATCH: &str = "local_code_match";

const QUANTITY_EPSILON: f64 = 1e-9;

/// Jaccard similarity of the two token sets.
pub fn token_jaccard(a: &NormalizedRecord, b: &NormalizedRecord) -> f64 {
    let set_a = a.features.token_set();
    let set_b = b.features.token_set();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Normalized Levenshtein ratio over the normalized texts.
pub fn edit_similarity(a: &NormalizedRecord, b: &NormalizedRecord) -> f64 {
    strsim::normalized_levenshtein(&a.features.normalized_text, &b.features.normalized_text)
}

/// 1.0 equal, 0.5 one side missing, 0.0 unequal. None when neither side has a quantity.
/// Multipacks only match multipacks of the same count.
pub fn quantity_match(a: &NormalizedRecord, b: &NormalizedRecord) -> Option<f64> {
    match (a.features.quantity, b.features.quantity) {
        (None, None) => None,
        (Some(_), None) | (None, Some(_)) => Some(0.5),
        (Some(qa), Some(qb)) => {
            let same_pack = a.features.pack_count.unwrap_or(1) == b.features.pack_count.unwrap_or(1);
            if same_pack && (qa - qb).abs() < QUANTITY_EPSILON {
                Some(1.0)
            } else {
                Some(0.0)
            }
        }
    }
}

/// 1.0 equal, 0.0 unequal. None when either side is unknown.
pub fn unit_match(a: &NormalizedRecord, b: &NormalizedRecord) -> Option<f64> {
    match (&a.features.unit_canonical, &b.features.unit_canonical) {
        (Some(ua), Some(ub)) => Some(if ua == ub { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Both records carry the same non-empty local code.
pub fn local_codes_match(a: &NormalizedRecord, b: &NormalizedRecord) -> bool {
    match (&a.record.local_code, &b.record.local_code) {
        (Some(ca), Some(cb)) => {
            let (ca, cb) = (ca.trim(), cb.trim());
            !ca.is_empty() && ca == cb
        }
        _ => false,
    }
}

/// Hand-tuned weighted combination of string and measure metrics.
#[derive(Debug, Clone)]
pub struct RuleBasedScorer {
    weights: MetricWeights,
}

impl RuleBasedScorer {
    pub fn new(weights: MetricWeights) -> Self {
        Self { weights }
    }

    /// Every rule metric that has a signal for this pair.
    pub fn breakdown(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert(TOKEN_JACCARD.to_string(), token_jaccard(a, b));
        metrics.insert(EDIT_DISTANCE.to_string(), edit_similarity(a, b));
        if let Some(q) = quantity_match(a, b) {
            metrics.insert(QUANTITY_MATCH.to_string(), q);
        }
        if let Some(u) = unit_match(a, b) {
            metrics.insert(UNIT_MATCH.to_string(), u);
        }
        metrics
    }

    /// Weighted mean over the weighted metrics present in `breakdown`.
    pub fn combine(&self, breakdown: &BTreeMap<String, f64>) -> f64 {
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (name, value) in breakdown {
            if let Some(w) = self.weights.get(name) {
                weighted += w * value;
                weight_sum += w;
            }
        }
        if weight_sum <= 0.0 {
            return 0.0;
        }
        (weighted / weight_sum).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawProductRecord;
    use crate::normalization::ProductNormalizer;
    use crate::utils::config::DedupConfig;

    fn record(id: &str, description: &str) -> NormalizedRecord {
        let normalizer = ProductNormalizer::new(&DedupConfig::default()).unwrap();
        let raw = RawProductRecord::new(id, "e1", description);
        let features = normalizer.extract(description, None).unwrap();
        NormalizedRecord {
            record: raw,
            features,
            unit_class: None,
        }
    }

    #[test]
    fn test_quantity_match_cases() {
        let a = record("a", "Arroz 5kg");
        let b = record("b", "Arroz 5 kg");
        let c = record("c", "Arroz 1kg");
        let d = record("d", "Arroz Tipo 1");
        let e = record("e", "Arroz Parboilizado");
        assert_eq!(quantity_match(&a, &b), Some(1.0));
        assert_eq!(quantity_match(&a, &c), Some(0.0));
        assert_eq!(quantity_match(&a, &d), Some(0.5));
        assert_eq!(quantity_match(&d, &e), None);
    }

    #[test]
    fn test_unit_match_omitted_when_unknown() {
        let a = record("a", "Leite 1L");
        let b = record("b", "Leite 1000ml");
        let c = record("c", "Leite Longa Vida");
        assert_eq!(unit_match(&a, &b), Some(0.0));
        assert_eq!(unit_match(&a, &c), None);
    }

    #[test]
    fn test_multipack_does_not_match_single_unit() {
        let single = record("a", "Cerveja Skol 350ml");
        let pack = record("b", "Cerveja Skol 12 x 350ml");
        assert_eq!(quantity_match(&single, &pack), Some(0.0));
    }

    #[test]
    fn test_abbreviated_description_scores_as_duplicate() {
        let scorer = RuleBasedScorer::new(MetricWeights::default());
        let short = record("a", "CAFE PILAO TRAD 500G");
        let long = record("b", "Cafe Pilao Tradicional 500g");
        assert_eq!(token_jaccard(&short, &long), 1.0);
        let score = scorer.combine(&scorer.breakdown(&short, &long));
        assert!(score >= DedupConfig::default().threshold, "score {}", score);
    }

    #[test]
    fn test_combine_renormalizes_over_present_metrics() {
        let scorer = RuleBasedScorer::new(MetricWeights::default());
        let mut breakdown = BTreeMap::new();
        breakdown.insert(TOKEN_JACCARD.to_string(), 1.0);
        breakdown.insert(EDIT_DISTANCE.to_string(), 1.0);
        // Missing quantity/unit signals do not drag the score down.
        assert!((scorer.combine(&breakdown) - 1.0).abs() < 1e-12);

        breakdown.insert(QUANTITY_MATCH.to_string(), 0.0);
        let expected = (0.4 + 0.3) / (0.4 + 0.3 + 0.2);
        assert!((scorer.combine(&breakdown) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_local_codes_must_be_non_empty() {
        let mut a = record("a", "Arroz 5kg");
        let mut b = record("b", "Feijao 1kg");
        a.record.local_code = Some(" ".to_string());
        b.record.local_code = Some(" ".to_string());
        assert!(!local_codes_match(&a, &b));
        a.record.local_code = Some("7891234".to_string());
        b.record.local_code = Some("7891234".to_string());
        assert!(local_codes_match(&a, &b));
    }
}
