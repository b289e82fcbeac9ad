// src/catalog/master_products.rs
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{Cluster, MappingRow, MasterProduct, NormalizedRecord, ReviewItem};
use crate::normalization::dictionaries::UNKNOWN_CATEGORY;
use crate::normalization::ProductNormalizer;
use crate::utils::config::DedupConfig;

/// Description length at which completeness saturates.
const COMPLETE_DESCRIPTION_LEN: f64 = 25.0;
/// Establishment count at which diversity saturates.
const DIVERSE_ESTABLISHMENTS: f64 = 5.0;
const INCONSISTENT_UNIT_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct CatalogBuild {
    /// Ordered by master id.
    pub masters: Vec<MasterProduct>,
    /// Ordered by raw id.
    pub mappings: Vec<MappingRow>,
    pub review_items: Vec<ReviewItem>,
}

pub fn master_id(index: usize) -> String {
    format!("MASTER_{:06}", index)
}

/// Turns each cluster into a master product plus one mapping row per member.
/// Clusters must already be sorted by smallest member id; ids follow that order.
pub fn build_master_products(
    clusters: &[Cluster],
    records: &[NormalizedRecord],
    normalizer: &ProductNormalizer,
    config: &DedupConfig,
) -> CatalogBuild {
    let by_id: HashMap<&str, &NormalizedRecord> = records.iter().map(|r| (r.id(), r)).collect();
    let mut build = CatalogBuild::default();

    for (idx, cluster) in clusters.iter().enumerate() {
        let members: Vec<&NormalizedRecord> = cluster
            .record_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        if members.is_empty() {
            continue;
        }
        let id = master_id(idx + 1);
        let (master, review) = build_master(&id, cluster, &members, normalizer, config);
        build.review_items.extend(review);

        for member in &members {
            build.mappings.push(MappingRow {
                raw_id: member.id().to_string(),
                master_id: id.clone(),
                establishment_id: member.record.establishment_id.clone(),
                original_description: member.record.local_description.clone(),
                normalized_text: member.features.normalized_text.clone(),
            });
        }
        build.masters.push(master);
    }
    build.mappings.sort_by(|a, b| a.raw_id.cmp(&b.raw_id));

    info!(
        "Built {} master products covering {} records",
        build.masters.len(),
        build.mappings.len()
    );
    build
}

fn build_master(
    master_id: &str,
    cluster: &Cluster,
    members: &[&NormalizedRecord],
    normalizer: &ProductNormalizer,
    config: &DedupConfig,
) -> (MasterProduct, Option<ReviewItem>) {
    let canonical_description = canonical_description(members);
    let alternative_descriptions: BTreeSet<String> = members
        .iter()
        .map(|m| m.record.local_description.clone())
        .filter(|d| *d != canonical_description)
        .collect();

    let units: BTreeSet<String> = members
        .iter()
        .filter_map(|m| {
            m.record
                .local_unit
                .as_deref()
                .and_then(|u| normalizer.canonical_unit(u))
                .or_else(|| m.features.unit_canonical.clone())
        })
        .collect();
    let mut review = None;
    let unit = match units.len() {
        0 => None,
        1 => units.iter().next().cloned(),
        _ => {
            let listed: Vec<String> = units.iter().cloned().collect();
            debug!("{}: contributors disagree on unit ({})", master_id, listed.join(", "));
            review = Some(ReviewItem::unit_disagreement(cluster.record_ids.clone(), &listed));
            None
        }
    };

    let category = most_frequent(
        members
            .iter()
            .map(|m| m.features.category_guess.as_str())
            .filter(|c| *c != UNKNOWN_CATEGORY),
    )
    .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
    let brand = most_frequent(members.iter().filter_map(|m| m.features.brand_guess.as_deref()));

    let prices = price_stats(members);
    let total_occurrences: u64 = members.iter().map(|m| m.record.occurrence_count).sum();
    let establishments: BTreeSet<&str> = members
        .iter()
        .map(|m| m.record.establishment_id.as_str())
        .collect();

    let confidence_score = confidence(cluster, members, config.coverage_penalty);
    let quality_score = quality(members, units.len() <= 1, establishments.len());

    let master = MasterProduct {
        master_id: master_id.to_string(),
        canonical_description,
        alternative_descriptions,
        category,
        brand,
        unit,
        avg_price: prices.map(|p| p.mean),
        min_price: prices.map(|p| p.min),
        max_price: prices.map(|p| p.max),
        price_variance: prices.map(|p| p.variance),
        total_occurrences,
        establishments_count: establishments.len(),
        confidence_score,
        quality_score,
        contributing_record_ids: cluster.record_ids.clone(),
    };
    (master, review)
}

/// Highest summed occurrence count; ties go to the longest, then the lexicographically first.
fn canonical_description(members: &[&NormalizedRecord]) -> String {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for m in members {
        *totals.entry(m.record.local_description.as_str()).or_insert(0) += m.record.occurrence_count;
    }
    totals
        .into_iter()
        .max_by(|(da, ca), (db, cb)| {
            ca.cmp(cb)
                .then_with(|| da.chars().count().cmp(&db.chars().count()))
                .then_with(|| db.cmp(da))
        })
        .map(|(d, _)| d.to_string())
        .unwrap_or_default()
}

/// Most frequent value, ties broken lexicographically.
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then_with(|| vb.cmp(va)))
        .map(|(v, _)| v.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PriceStats {
    mean: f64,
    variance: f64,
    min: f64,
    max: f64,
}

/// Occurrence-weighted statistics: a record's occurrences are spread evenly
/// over its observed prices.
fn price_stats(members: &[&NormalizedRecord]) -> Option<PriceStats> {
    let observations: Vec<(f64, f64)> = members
        .iter()
        .flat_map(|m| {
            let prices: Vec<f64> = m
                .record
                .known_prices
                .iter()
                .copied()
                .filter(|p| p.is_finite())
                .collect();
            let weight = m.record.occurrence_count as f64 / prices.len().max(1) as f64;
            prices.into_iter().map(move |p| (p, weight))
        })
        .collect();
    let total_weight: f64 = observations.iter().map(|(_, w)| w).sum();
    if observations.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let mean = observations.iter().map(|(p, w)| p * w).sum::<f64>() / total_weight;
    let variance = observations
        .iter()
        .map(|(p, w)| w * (p - mean).powi(2))
        .sum::<f64>()
        / total_weight;
    let min = observations.iter().map(|(p, _)| *p).fold(f64::INFINITY, f64::min);
    let max = observations.iter().map(|(p, _)| *p).fold(f64::NEG_INFINITY, f64::max);
    Some(PriceStats { mean, variance, min, max })
}

fn confidence(cluster: &Cluster, members: &[&NormalizedRecord], coverage_penalty: f64) -> f64 {
    let base = if cluster.supporting_edges.is_empty() {
        1.0
    } else {
        cluster.supporting_edges.iter().map(|e| e.score).sum::<f64>()
            / cluster.supporting_edges.len() as f64
    };
    let missing = members
        .iter()
        .filter(|m| !m.features.has_full_measure())
        .count() as f64
        / members.len() as f64;
    (base * (1.0 - coverage_penalty * missing)).clamp(0.0, 1.0)
}

fn quality(members: &[&NormalizedRecord], unit_consistent: bool, establishments: usize) -> f64 {
    let avg_len = members
        .iter()
        .map(|m| m.record.local_description.chars().count() as f64)
        .sum::<f64>()
        / members.len() as f64;
    let completeness = (avg_len / COMPLETE_DESCRIPTION_LEN).min(1.0);
    let consistency = if unit_consistent { 1.0 } else { INCONSISTENT_UNIT_FACTOR };
    let diversity = (establishments as f64 / DIVERSE_ESTABLISHMENTS).min(1.0);
    (0.4 * completeness + 0.3 * consistency + 0.3 * diversity).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MergeEdge, PairKey, RawProductRecord, ReviewKind};

    fn normalizer() -> ProductNormalizer {
        ProductNormalizer::new(&DedupConfig::default()).unwrap()
    }

    fn record(
        normalizer: &ProductNormalizer,
        id: &str,
        est: &str,
        desc: &str,
        occurrences: u64,
        prices: &[f64],
    ) -> NormalizedRecord {
        let mut raw = RawProductRecord::new(id, est, desc);
        raw.occurrence_count = occurrences;
        raw.known_prices = prices.to_vec();
        let features = normalizer.extract(desc, None).unwrap();
        let unit_class = features
            .unit_canonical
            .as_deref()
            .and_then(|u| normalizer.unit_class(u));
        NormalizedRecord { record: raw, features, unit_class }
    }

    fn cluster(ids: &[&str], edges: &[(&str, &str, f64)]) -> Cluster {
        Cluster {
            record_ids: ids.iter().map(|s| s.to_string()).collect(),
            unit_class: None,
            supporting_edges: edges
                .iter()
                .map(|(a, b, s)| MergeEdge { pair: PairKey::new(a, b), score: *s })
                .collect(),
            split_from_incoherent: false,
        }
    }

    #[test]
    fn test_master_aggregates_its_contributors() {
        let n = normalizer();
        let records = vec![
            record(&n, "r1", "e1", "ARROZ TIO JOAO 5KG", 3, &[20.0, 22.0]),
            record(&n, "r2", "e2", "Arroz Tio Joao 5 Kg", 5, &[24.0]),
        ];
        let clusters = vec![cluster(&["r1", "r2"], &[("r1", "r2", 0.95)])];
        let build = build_master_products(&clusters, &records, &n, &DedupConfig::default());

        assert_eq!(build.masters.len(), 1);
        let m = &build.masters[0];
        assert_eq!(m.master_id, "MASTER_000001");
        assert_eq!(m.canonical_description, "Arroz Tio Joao 5 Kg");
        assert!(m.alternative_descriptions.contains("ARROZ TIO JOAO 5KG"));
        assert_eq!(m.unit.as_deref(), Some("KG"));
        assert_eq!(m.brand.as_deref(), Some("tio joao"));
        assert_eq!(m.category, "other");
        assert_eq!(m.total_occurrences, 8);
        assert_eq!(m.establishments_count, 2);
        assert!((m.confidence_score - 0.95).abs() < 1e-12);
        assert_eq!(m.min_price, Some(20.0));
        assert_eq!(m.max_price, Some(24.0));
        // weights: 1.5, 1.5, 5.0
        let mean = (1.5 * 20.0 + 1.5 * 22.0 + 5.0 * 24.0) / 8.0;
        assert!((m.avg_price.unwrap() - mean).abs() < 1e-9);
        assert!(build.review_items.is_empty());

        let ids: Vec<&str> = build.mappings.iter().map(|r| r.raw_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(build.mappings.iter().all(|r| r.master_id == "MASTER_000001"));
    }

    #[test]
    fn test_canonical_description_ties() {
        let n = normalizer();
        let records = vec![
            record(&n, "a", "e1", "Cafe Pilao 500g", 2, &[]),
            record(&n, "b", "e1", "Cafe Pilao Trad 500g", 2, &[]),
            record(&n, "c", "e1", "Cafe Pilao Extr 500g", 2, &[]),
        ];
        let refs: Vec<&NormalizedRecord> = records.iter().collect();
        assert_eq!(canonical_description(&refs), "Cafe Pilao Extr 500g");
    }

    #[test]
    fn test_unit_disagreement_leaves_unit_empty() {
        let n = normalizer();
        let records = vec![
            record(&n, "a", "e1", "Farinha Trigo 1kg", 1, &[]),
            record(&n, "b", "e2", "Farinha Trigo 1000g", 1, &[]),
        ];
        let clusters = vec![cluster(&["a", "b"], &[("a", "b", 0.9)])];
        let build = build_master_products(&clusters, &records, &n, &DedupConfig::default());
        assert_eq!(build.masters[0].unit, None);
        assert_eq!(build.review_items.len(), 1);
        assert_eq!(build.review_items[0].kind, ReviewKind::UnitDisagreement);
        assert!(build.masters[0].quality_score < 1.0);
    }

    #[test]
    fn test_singleton_confidence_and_coverage_penalty() {
        let n = normalizer();
        let records = vec![
            record(&n, "a", "e1", "Banana Prata", 1, &[]),
            record(&n, "b", "e1", "Leite Integral 1L", 1, &[]),
        ];
        let clusters = vec![cluster(&["a"], &[]), cluster(&["b"], &[])];
        let build = build_master_products(&clusters, &records, &n, &DedupConfig::default());
        assert!((build.masters[0].confidence_score - 0.8).abs() < 1e-12);
        assert_eq!(build.masters[1].confidence_score, 1.0);
        assert_eq!(build.masters[1].master_id, "MASTER_000002");
        assert_eq!(build.masters[0].avg_price, None);
    }

    #[test]
    fn test_category_prefers_known_guess() {
        assert_eq!(
            most_frequent(["dairy", "beverages", "dairy"].into_iter()).as_deref(),
            Some("dairy")
        );
        assert_eq!(most_frequent(["b", "a"].into_iter()).as_deref(), Some("a"));
        assert_eq!(most_frequent(std::iter::empty()), None);
    }
}
