// src/candidate_generation/candidate_generation.rs
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::models::{BlockingStats, CandidatePair, NormalizedRecord, PairKey};
use crate::utils::config::BlockingConfig;

/// Which cheap key records are grouped by before pairwise comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingStrategy {
    /// `(category_guess, first token)`
    #[default]
    CategoryFirstToken,
    FirstToken,
    /// `(category_guess, first two tokens)`, for when blocks grow too large.
    CategoryFirstTwoTokens,
}

impl FromStr for BlockingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "category_first_token" => Ok(BlockingStrategy::CategoryFirstToken),
            "first_token" => Ok(BlockingStrategy::FirstToken),
            "category_first_two_tokens" => Ok(BlockingStrategy::CategoryFirstTwoTokens),
            other => Err(format!("unknown blocking strategy '{}'", other)),
        }
    }
}

impl BlockingStrategy {
    pub fn key_for(&self, record: &NormalizedRecord) -> String {
        let features = &record.features;
        let first = features.first_token().unwrap_or("");
        match self {
            BlockingStrategy::CategoryFirstToken => {
                format!("{}|{}", features.category_guess, first)
            }
            BlockingStrategy::FirstToken => first.to_string(),
            BlockingStrategy::CategoryFirstTwoTokens => {
                let second = features.tokens.get(1).map(String::as_str).unwrap_or("");
                format!("{}|{}|{}", features.category_guess, first, second)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateSet {
    /// Sorted by pair, each pair once.
    pub pairs: Vec<CandidatePair>,
    pub stats: BlockingStats,
}

/// Generates candidate pairs: all pairs within a block, plus pairs sharing
/// enough tokens across blocks. The first key to produce a pair wins.
pub fn generate_candidates(
    records: &[NormalizedRecord],
    config: &BlockingConfig,
    pb: Option<&ProgressBar>,
) -> CandidateSet {
    let mut blocks: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for record in records {
        blocks
            .entry(config.strategy.key_for(record))
            .or_default()
            .push(record.id());
    }
    for members in blocks.values_mut() {
        members.sort_unstable();
        members.dedup();
    }

    if let Some(pb) = pb {
        pb.set_length(blocks.len() as u64);
    }
    let mut produced: BTreeMap<PairKey, String> = BTreeMap::new();
    for (key, members) in &blocks {
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                produced
                    .entry(PairKey::new(a, b))
                    .or_insert_with(|| key.clone());
            }
        }
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    let blocking_pairs = produced.len();

    let mut skipped_common_tokens = 0;
    if config.secondary_pass {
        skipped_common_tokens = shared_token_pass(records, config, &mut produced);
    }
    let secondary_pairs = produced.len() - blocking_pairs;

    let sizes: Vec<usize> = blocks.values().map(Vec::len).collect();
    let max_block_size = sizes.iter().copied().max().unwrap_or(0);
    let oversized: Vec<(&String, usize)> = blocks
        .iter()
        .filter(|(_, m)| m.len() > config.block_size_warning)
        .map(|(k, m)| (k, m.len()))
        .collect();
    for (key, size) in &oversized {
        warn!(
            "Block '{}' has {} records (warning threshold {}); consider a wider blocking key",
            key, size, config.block_size_warning
        );
    }

    let stats = BlockingStats {
        block_count: blocks.len(),
        avg_block_size: if blocks.is_empty() {
            0.0
        } else {
            records.len() as f64 / blocks.len() as f64
        },
        max_block_size,
        oversized_blocks: oversized.len(),
        blocking_pairs,
        secondary_pairs,
        skipped_common_tokens,
        total_pairs: produced.len(),
    };
    info!(
        "Blocking: {} blocks (avg {:.1}, max {}), {} pairs from blocks + {} from shared tokens",
        stats.block_count,
        stats.avg_block_size,
        stats.max_block_size,
        stats.blocking_pairs,
        stats.secondary_pairs
    );
    if let Some(pb) = pb {
        pb.finish_with_message(format!("{} candidate pairs", stats.total_pairs));
    }

    let pairs = produced
        .into_iter()
        .map(|(pair, blocking_key)| CandidatePair { pair, blocking_key })
        .collect();
    CandidateSet { pairs, stats }
}

/// Pairs records sharing at least `min_shared_tokens` tokens via an inverted
/// index. Returns how many over-common tokens were ignored.
fn shared_token_pass(
    records: &[NormalizedRecord],
    config: &BlockingConfig,
    produced: &mut BTreeMap<PairKey, String>,
) -> usize {
    let mut postings: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        for token in &record.features.tokens {
            postings.entry(token.as_str()).or_default().push(idx);
        }
    }

    let mut skipped = 0;
    let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
    for (token, list) in &postings {
        if list.len() > config.max_token_postings {
            debug!(
                "Token '{}' appears in {} records; skipped in shared-token pass",
                token,
                list.len()
            );
            skipped += 1;
            continue;
        }
        for (i, &x) in list.iter().enumerate() {
            for &y in &list[i + 1..] {
                *shared.entry((x, y)).or_insert(0) += 1;
            }
        }
    }
    if skipped > 0 {
        info!(
            "Shared-token pass skipped {} tokens with more than {} postings",
            skipped, config.max_token_postings
        );
    }

    for ((x, y), count) in shared {
        if count < config.min_shared_tokens {
            continue;
        }
        let (a, b) = (records[x].id(), records[y].id());
        if a == b {
            continue;
        }
        produced
            .entry(PairKey::new(a, b))
            .or_insert_with(|| format!("shared_tokens:{}", count));
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedFeatures, RawProductRecord};

    fn record(id: &str, category: &str, tokens: &[&str]) -> NormalizedRecord {
        NormalizedRecord {
            record: RawProductRecord::new(id, "e1", &tokens.join(" ")),
            features: NormalizedFeatures {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                normalized_text: tokens.join(" "),
                quantity: None,
                unit_canonical: None,
                pack_count: None,
                brand_guess: None,
                category_guess: category.to_string(),
            },
            unit_class: None,
        }
    }

    #[test]
    fn test_pairs_within_blocks_only_by_default_key() {
        let records = vec![
            record("a", "other", &["arroz", "camil"]),
            record("b", "other", &["arroz", "tio"]),
            record("c", "dairy", &["leite", "integral"]),
            record("d", "dairy", &["leite", "desnatado"]),
        ];
        let config = BlockingConfig::default();
        let set = generate_candidates(&records, &config, None);
        let pairs: Vec<(String, String)> = set
            .pairs
            .iter()
            .map(|p| (p.pair.record_id_a.clone(), p.pair.record_id_b.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![("a".to_string(), "b".to_string()), ("c".to_string(), "d".to_string())]
        );
        assert_eq!(set.pairs[0].blocking_key, "other|arroz");
        assert_eq!(set.stats.block_count, 2);
        assert_eq!(set.stats.secondary_pairs, 0);
    }

    #[test]
    fn test_secondary_pass_recovers_misblocked_pairs() {
        // Same product with a differing first token and category guess.
        let records = vec![
            record("a", "other", &["arroz", "tio", "joao"]),
            record("b", "unknown", &["tio", "joao", "arroz"]),
        ];
        let config = BlockingConfig::default();
        let set = generate_candidates(&records, &config, None);
        assert_eq!(set.pairs.len(), 1);
        assert_eq!(set.pairs[0].blocking_key, "shared_tokens:3");

        let mut off = BlockingConfig::default();
        off.secondary_pass = false;
        assert!(generate_candidates(&records, &off, None).pairs.is_empty());
    }

    #[test]
    fn test_common_tokens_are_skipped_in_secondary_pass() {
        let records = vec![
            record("a", "x", &["p", "common"]),
            record("b", "y", &["q", "common"]),
            record("c", "z", &["r", "common"]),
        ];
        let mut config = BlockingConfig::default();
        config.min_shared_tokens = 1;
        config.max_token_postings = 2;
        let set = generate_candidates(&records, &config, None);
        assert!(set.pairs.is_empty());
        assert_eq!(set.stats.skipped_common_tokens, 1);
    }

    #[test]
    fn test_strategy_keys_and_parsing() {
        let r = record("a", "dairy", &["leite", "integral"]);
        assert_eq!(BlockingStrategy::FirstToken.key_for(&r), "leite");
        assert_eq!(
            BlockingStrategy::CategoryFirstTwoTokens.key_for(&r),
            "dairy|leite|integral"
        );
        assert_eq!(
            "first_token".parse::<BlockingStrategy>(),
            Ok(BlockingStrategy::FirstToken)
        );
        assert!("soundex".parse::<BlockingStrategy>().is_err());
    }
}
