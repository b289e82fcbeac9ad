// src/matching/manager.rs
use anyhow::{anyhow, Result};
use indicatif::ProgressBar;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

use crate::matching::SimilarityScorer;
use crate::models::{CandidatePair, NormalizedRecord, ScoreMethod, SimilarityScore};
use crate::utils::deadline::Deadline;

/// Id → record lookup for one run.
pub fn index_records(records: &[NormalizedRecord]) -> HashMap<&str, &NormalizedRecord> {
    records.iter().map(|r| (r.id(), r)).collect()
}

/// Scores every candidate pair in parallel. The result is sorted by pair so
/// it does not depend on worker scheduling. Fails as soon as a worker sees `deadline` pass.
pub fn score_candidates(
    scorer: &SimilarityScorer,
    records: &[NormalizedRecord],
    candidates: &[CandidatePair],
    deadline: &Deadline,
    pb: Option<&ProgressBar>,
) -> Result<Vec<SimilarityScore>> {
    let start = Instant::now();
    let lookup = index_records(records);

    let mut scores = candidates
        .par_iter()
        .map(|candidate| {
            deadline.check("scoring")?;
            let a = lookup.get(candidate.pair.record_id_a.as_str()).ok_or_else(|| {
                anyhow!("candidate references unknown record {}", candidate.pair.record_id_a)
            })?;
            let b = lookup.get(candidate.pair.record_id_b.as_str()).ok_or_else(|| {
                anyhow!("candidate references unknown record {}", candidate.pair.record_id_b)
            })?;
            let score = scorer.score(a, b)?;
            if let Some(pb) = pb {
                pb.inc(1);
            }
            Ok(score)
        })
        .collect::<Result<Vec<SimilarityScore>>>()?;
    scores.sort_by(|x, y| x.pair.cmp(&y.pair));

    if let Some(pb) = pb {
        pb.finish_with_message(format!("{} pairs scored", scores.len()));
    }
    let by_method = scores.iter().fold(HashMap::new(), |mut acc, s| {
        *acc.entry(s.method.as_str()).or_insert(0usize) += 1;
        acc
    });
    debug!("Score methods: {:?}", by_method);
    info!(
        "Scored {} candidate pairs in {:.2?} ({} hybrid/classifier)",
        scores.len(),
        start.elapsed(),
        scores
            .iter()
            .filter(|s| s.method != ScoreMethod::RuleBased)
            .count()
    );
    Ok(scores)
}
