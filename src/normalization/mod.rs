// src/normalization/mod.rs
pub mod dictionaries;
pub mod feature_cache;
pub mod normalizer;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::errors::DedupError;
use crate::utils::deadline::Deadline;
use crate::models::{
    NormalizationStats, NormalizedFeatures, NormalizedRecord, RawProductRecord, ReviewItem,
};
pub use feature_cache::{create_shared_feature_cache, FeatureCache, SharedFeatureCache};
pub use normalizer::{fold_text, NormalizationOutcome, ProductNormalizer};

/// Output of normalizing a run's input.
#[derive(Debug, Clone)]
pub struct NormalizationBatch {
    /// Valid records, sorted by id.
    pub records: Vec<NormalizedRecord>,
    pub skipped: Vec<ReviewItem>,
    pub stats: NormalizationStats,
}

/// Normalizes every record, reusing cached features by content hash.
/// Cache misses are computed in parallel; output order never depends on scheduling.
/// Workers stop extracting once `deadline` passes and the batch is abandoned.
pub fn normalize_records(
    normalizer: &ProductNormalizer,
    records: &[RawProductRecord],
    cache: &SharedFeatureCache,
    deadline: &Deadline,
    pb: Option<&ProgressBar>,
) -> Result<NormalizationBatch, DedupError> {
    let mut skipped = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut pending: Vec<(&RawProductRecord, String)> = Vec::with_capacity(records.len());

    for record in records {
        if !seen_ids.insert(record.id.as_str()) {
            warn!("Skipping duplicate record id {}", record.id);
            let err = DedupError::MalformedRecord {
                record_id: record.id.clone(),
                reason: "duplicate record id".to_string(),
            };
            skipped.extend(ReviewItem::from_error(&err, None));
            continue;
        }
        if let Err(err) = ProductNormalizer::check_record(record) {
            warn!("Skipping record: {}", err);
            skipped.extend(ReviewItem::from_error(&err, None));
            continue;
        }
        let key = feature_cache::content_key(&record.local_description, record.local_unit.as_deref());
        pending.push((record, key));
    }

    // Look up everything under one lock, then compute misses without holding it.
    let mut resolved: HashMap<String, Option<NormalizedFeatures>> = HashMap::new();
    let mut queued: HashSet<&str> = HashSet::new();
    let mut misses: Vec<(&RawProductRecord, &str)> = Vec::new();
    {
        let mut guard = feature_cache::lock_cache(cache);
        for (record, key) in &pending {
            if resolved.contains_key(key) || queued.contains(key.as_str()) {
                continue;
            }
            match guard.get(key) {
                Some(features) => {
                    resolved.insert(key.clone(), Some(features));
                }
                None => {
                    queued.insert(key.as_str());
                    misses.push((*record, key.as_str()));
                }
            }
        }
    }
    debug!(
        "Normalization: {} records, {} distinct contents to compute",
        pending.len(),
        misses.len()
    );

    let computed: Vec<(String, Option<NormalizedFeatures>)> = misses
        .par_iter()
        .map(|(record, key)| {
            if deadline.expired() {
                return (key.to_string(), None);
            }
            let features =
                normalizer.extract(&record.local_description, record.local_unit.as_deref());
            if let Some(pb) = pb {
                pb.inc(1);
            }
            (key.to_string(), features)
        })
        .collect();
    deadline.check("normalization")?;

    {
        let mut guard = feature_cache::lock_cache(cache);
        for (key, features) in &computed {
            if let Some(features) = features {
                guard.put(key.clone(), features.clone());
            }
        }
    }
    resolved.extend(computed);

    let mut normalized = Vec::with_capacity(pending.len());
    for (record, key) in &pending {
        match resolved.get(key) {
            Some(Some(features)) => {
                let unit_class = features
                    .unit_canonical
                    .as_deref()
                    .and_then(|u| normalizer.unit_class(u));
                normalized.push(NormalizedRecord {
                    record: (*record).clone(),
                    features: features.clone(),
                    unit_class,
                });
            }
            _ => {
                let err = DedupError::MalformedRecord {
                    record_id: record.id.clone(),
                    reason: format!(
                        "no tokens left after normalizing '{}'",
                        record.local_description
                    ),
                };
                warn!("Skipping record: {}", err);
                skipped.extend(ReviewItem::from_error(&err, None));
            }
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message(format!("{} records normalized", normalized.len()));
    }

    normalized.sort_by(|a, b| a.id().cmp(b.id()));
    let stats = normalization_stats(&normalized, records.len());
    info!(
        "Normalized {} of {} records ({} skipped); {} distinct originals → {} normalized texts",
        normalized.len(),
        records.len(),
        skipped.len(),
        stats.unique_originals,
        stats.unique_normalized
    );

    Ok(NormalizationBatch {
        records: normalized,
        skipped,
        stats,
    })
}

pub fn normalization_stats(records: &[NormalizedRecord], total: usize) -> NormalizationStats {
    let unique_originals: HashSet<&str> = records
        .iter()
        .map(|r| r.record.local_description.trim())
        .collect();
    let unique_normalized: HashSet<&str> = records
        .iter()
        .map(|r| r.features.normalized_text.as_str())
        .collect();
    let brands: HashSet<&str> = records
        .iter()
        .filter_map(|r| r.features.brand_guess.as_deref())
        .collect();
    let categories: HashSet<&str> = records
        .iter()
        .map(|r| r.features.category_guess.as_str())
        .collect();
    let token_total: usize = records.iter().map(|r| r.features.tokens.len()).sum();

    let reduction_ratio = if unique_originals.is_empty() {
        0.0
    } else {
        1.0 - unique_normalized.len() as f64 / unique_originals.len() as f64
    };

    NormalizationStats {
        total_descriptions: total,
        unique_originals: unique_originals.len(),
        unique_normalized: unique_normalized.len(),
        reduction_ratio,
        brands_detected: brands.len(),
        categories_detected: categories.len(),
        avg_token_count: if records.is_empty() {
            0.0
        } else {
            token_total as f64 / records.len() as f64
        },
    }
}
