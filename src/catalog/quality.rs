// src/catalog/quality.rs
use log::info;
use std::collections::BTreeMap;

use crate::models::{
    BlockingStats, HistogramBucket, MasterProduct, NormalizationStats, QualityReport, ReviewItem,
};
use crate::normalization::dictionaries::UNKNOWN_CATEGORY;
use crate::utils::config::DedupConfig;

/// Everything a run knows that the report summarizes.
pub struct ReportInputs<'a> {
    pub total_raw_records: usize,
    pub clustered_records: usize,
    pub masters: &'a [MasterProduct],
    pub review_items: Vec<ReviewItem>,
    pub normalization: NormalizationStats,
    pub blocking: BlockingStats,
}

pub fn build_quality_report(inputs: ReportInputs<'_>, config: &DedupConfig) -> QualityReport {
    let masters = inputs.masters;
    let dedup_rate = if inputs.clustered_records == 0 {
        0.0
    } else {
        1.0 - masters.len() as f64 / inputs.clustered_records as f64
    };

    let mean = |f: fn(&MasterProduct) -> f64| {
        if masters.is_empty() {
            0.0
        } else {
            masters.iter().map(f).sum::<f64>() / masters.len() as f64
        }
    };
    let avg_confidence = mean(|m: &MasterProduct| m.confidence_score);
    let avg_quality = mean(|m: &MasterProduct| m.quality_score);

    let mut category_distribution = BTreeMap::new();
    let mut unit_distribution = BTreeMap::new();
    for m in masters {
        *category_distribution.entry(m.category.clone()).or_insert(0) += 1;
        let unit = m.unit.clone().unwrap_or_else(|| "none".to_string());
        *unit_distribution.entry(unit).or_insert(0) += 1;
    }

    let mut manual_review_queue = inputs.review_items;
    manual_review_queue.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut report = QualityReport {
        dedup_rate,
        total_raw_records: inputs.total_raw_records,
        clustered_records: inputs.clustered_records,
        skipped_records: inputs.total_raw_records.saturating_sub(inputs.clustered_records),
        total_master_products: masters.len(),
        cross_establishment_products: masters.iter().filter(|m| m.establishments_count > 1).count(),
        avg_confidence,
        avg_quality,
        low_confidence_count: masters
            .iter()
            .filter(|m| m.confidence_score < config.low_confidence_threshold)
            .count(),
        confidence_histogram: confidence_histogram(masters, config.histogram_buckets),
        manual_review_queue,
        category_distribution,
        unit_distribution,
        normalization: inputs.normalization,
        blocking: inputs.blocking,
        recommendations: Vec::new(),
    };
    report.recommendations = recommendations(&report);
    log_report(&report);
    report
}

/// Slack for scores that sit on a bucket edge but lost a ulp in arithmetic.
const BUCKET_EDGE_EPSILON: f64 = 1e-9;

/// Equal-width buckets `[lower, upper)` over [0, 1]; a score on an edge goes to
/// the bucket it opens, and exactly 1.0 lands in the last bucket.
pub fn confidence_histogram(masters: &[MasterProduct], buckets: usize) -> Vec<HistogramBucket> {
    let buckets = buckets.max(1);
    let n = buckets as f64;
    let mut histogram: Vec<HistogramBucket> = (0..buckets)
        .map(|i| HistogramBucket {
            lower: i as f64 / n,
            upper: (i + 1) as f64 / n,
            count: 0,
        })
        .collect();
    for m in masters {
        let scaled = m.confidence_score.clamp(0.0, 1.0) * n + BUCKET_EDGE_EPSILON;
        let idx = (scaled.floor() as usize).min(buckets - 1);
        histogram[idx].count += 1;
    }
    histogram
}

fn recommendations(report: &QualityReport) -> Vec<String> {
    let mut out = Vec::new();

    if report.dedup_rate > 0.3 {
        out.push(format!(
            "High deduplication rate ({:.1}%): spot-check the largest master products for over-merging.",
            report.dedup_rate * 100.0
        ));
    } else if report.dedup_rate < 0.05 && report.clustered_records > 0 {
        out.push(format!(
            "Low deduplication rate ({:.1}%): consider lowering the threshold or widening blocking.",
            report.dedup_rate * 100.0
        ));
    }

    if !report.manual_review_queue.is_empty() {
        out.push(format!(
            "{} items await manual review; labeling them feeds the active-learning trainer.",
            report.manual_review_queue.len()
        ));
    }
    if report.low_confidence_count > 0 {
        out.push(format!(
            "{} master products have confidence below the low-confidence threshold.",
            report.low_confidence_count
        ));
    }

    let unknown = report
        .category_distribution
        .get(UNKNOWN_CATEGORY)
        .copied()
        .unwrap_or(0);
    if report.total_master_products > 0
        && unknown as f64 / report.total_master_products as f64 > 0.2
    {
        out.push(format!(
            "{} master products are uncategorized; extend the category keywords.",
            unknown
        ));
    }

    let distinct_units = report.unit_distribution.keys().filter(|u| *u != "none").count();
    if distinct_units > 10 {
        out.push(format!(
            "{} distinct canonical units in use; review the unit standardization table.",
            distinct_units
        ));
    }
    out
}

fn log_report(report: &QualityReport) {
    info!("Deduplication quality report:");
    info!(
        "  Records: {} raw, {} clustered, {} skipped",
        report.total_raw_records, report.clustered_records, report.skipped_records
    );
    info!(
        "  Master products: {} ({:.1}% dedup rate, {} cross-establishment)",
        report.total_master_products,
        report.dedup_rate * 100.0,
        report.cross_establishment_products
    );
    info!(
        "  Average confidence {:.3}, average quality {:.3}, {} low-confidence",
        report.avg_confidence, report.avg_quality, report.low_confidence_count
    );
    info!("  Manual review queue: {} items", report.manual_review_queue.len());
    for rec in &report.recommendations {
        info!("  → {}", rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewKind;
    use std::collections::BTreeSet;

    fn master(id: &str, confidence: f64, category: &str, establishments: usize) -> MasterProduct {
        MasterProduct {
            master_id: id.to_string(),
            canonical_description: id.to_string(),
            alternative_descriptions: BTreeSet::new(),
            category: category.to_string(),
            brand: None,
            unit: Some("KG".to_string()),
            avg_price: None,
            min_price: None,
            max_price: None,
            price_variance: None,
            total_occurrences: 1,
            establishments_count: establishments,
            confidence_score: confidence,
            quality_score: 0.5,
            contributing_record_ids: vec![id.to_string()],
        }
    }

    fn review(kind: ReviewKind, id: &str) -> ReviewItem {
        ReviewItem {
            kind,
            record_ids: vec![id.to_string()],
            score: None,
            message: String::new(),
        }
    }

    #[test]
    fn test_histogram_edges() {
        let masters = vec![master("a", 1.0, "x", 1), master("b", 0.0, "x", 1), master("c", 0.55, "x", 1)];
        let h = confidence_histogram(&masters, 10);
        assert_eq!(h.len(), 10);
        assert_eq!(h[9].count, 1);
        assert_eq!(h[0].count, 1);
        assert_eq!(h[5].count, 1);
        assert_eq!(h[9].upper, 1.0);
    }

    #[test]
    fn test_histogram_edge_scores_open_their_bucket() {
        let masters = vec![
            master("a", 0.3, "x", 1),
            master("b", 0.6, "x", 1),
            master("c", 0.7, "x", 1),
            master("d", 0.1 + 0.2, "x", 1),
            master("e", 0.699, "x", 1),
        ];
        let h = confidence_histogram(&masters, 10);
        assert_eq!(h[3].count, 2);
        assert_eq!(h[3].lower, 0.3);
        assert_eq!(h[6].count, 2);
        assert_eq!(h[7].count, 1);
        assert_eq!(h[7].lower, 0.7);

        // the bucket holding 0.7 starts at the low-confidence threshold
        let config = DedupConfig::default();
        let low: usize = h.iter().filter(|b| b.upper <= config.low_confidence_threshold + 1e-12).map(|b| b.count).sum();
        let expected = masters
            .iter()
            .filter(|m| m.confidence_score < config.low_confidence_threshold)
            .count();
        assert_eq!(low, expected);
    }

    #[test]
    fn test_report_counts_and_queue_order() {
        let masters = vec![
            master("a", 0.95, "dairy", 2),
            master("b", 0.5, UNKNOWN_CATEGORY, 1),
            master("c", 1.0, "dairy", 1),
        ];
        let inputs = ReportInputs {
            total_raw_records: 6,
            clustered_records: 5,
            masters: &masters,
            review_items: vec![
                review(ReviewKind::CoherenceSplit, "z"),
                review(ReviewKind::MalformedRecord, "q"),
            ],
            normalization: NormalizationStats::default(),
            blocking: BlockingStats::default(),
        };
        let report = build_quality_report(inputs, &DedupConfig::default());

        assert!((report.dedup_rate - 0.4).abs() < 1e-12);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.cross_establishment_products, 1);
        assert_eq!(report.low_confidence_count, 1);
        assert_eq!(report.category_distribution.get("dairy"), Some(&2));
        assert_eq!(report.manual_review_queue[0].kind, ReviewKind::MalformedRecord);
        assert!(report.recommendations.iter().any(|r| r.contains("uncategorized")));
    }

    #[test]
    fn test_empty_run_has_zero_rate() {
        let report = build_quality_report(
            ReportInputs {
                total_raw_records: 0,
                clustered_records: 0,
                masters: &[],
                review_items: Vec::new(),
                normalization: NormalizationStats::default(),
                blocking: BlockingStats::default(),
            },
            &DedupConfig::default(),
        );
        assert_eq!(report.dedup_rate, 0.0);
        assert_eq!(report.avg_confidence, 0.0);
        assert!(report.recommendations.is_empty());
    }
}
