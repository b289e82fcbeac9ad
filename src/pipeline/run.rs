// src/pipeline/run.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::MultiProgress;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::candidate_generation::generate_candidates;
use crate::catalog::{build_master_products, build_quality_report, ReportInputs};
use crate::clustering::{build_clusters, ScoreLookup};
use crate::learning::ClassifierScorer;
use crate::learning::PairClassifier;
use crate::matching::embedding::{EmbeddingProvider, EmbeddingScorer, EMBEDDING_COSINE};
use crate::matching::manager::score_candidates;
use crate::matching::SimilarityScorer;
use crate::models::{
    BlockingStats, CandidatePair, Cluster, MappingRow, MasterProduct, NormalizationStats,
    NormalizedRecord, QualityReport, RawProductRecord, ReviewItem, SimilarityScore,
};
use crate::normalization::{
    create_shared_feature_cache, feature_cache, normalize_records, ProductNormalizer,
    SharedFeatureCache,
};
use crate::pipeline::checkpoint::{
    run_fingerprint, CheckpointStore, ClusteringCheckpoint, ScoringCheckpoint,
};
use crate::utils::config::DedupConfig;
use crate::utils::deadline::Deadline;
use crate::utils::get_memory_usage;
use crate::utils::progress_config::{phase_bar, ProgressConfig};

/// Optional second similarity signal for a run.
pub enum SupplementalSource {
    RuleBasedOnly,
    Embedding(Box<dyn EmbeddingProvider>),
    Classifier(PairClassifier),
}

impl SupplementalSource {
    pub fn name(&self) -> Option<&'static str> {
        match self {
            SupplementalSource::RuleBasedOnly => None,
            SupplementalSource::Embedding(_) => Some(EMBEDDING_COSINE),
            SupplementalSource::Classifier(_) => Some(crate::learning::classifier::CLASSIFIER_PROBABILITY),
        }
    }

    /// What the scores depend on: the signal plus the model behind it.
    pub fn identity(&self) -> String {
        match self {
            SupplementalSource::RuleBasedOnly => "rule_based".to_string(),
            SupplementalSource::Embedding(provider) => {
                format!("{}:{}", EMBEDDING_COSINE, provider.model_name())
            }
            SupplementalSource::Classifier(model) => {
                let weights: Vec<String> = model.weights().iter().map(|w| format!("{:.12}", w)).collect();
                format!(
                    "{}:v{}:{}",
                    crate::learning::classifier::CLASSIFIER_PROBABILITY,
                    model.version,
                    weights.join(",")
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub seconds: f64,
}

/// Everything a run produces; persisted as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub masters: Vec<MasterProduct>,
    pub mappings: Vec<MappingRow>,
    pub report: QualityReport,
    pub timings: Vec<PhaseTiming>,
}

/// Normalized records and their scored candidate pairs.
pub struct ScoredRun {
    pub fingerprint: String,
    pub total_raw_records: usize,
    pub records: Vec<NormalizedRecord>,
    pub skipped: Vec<ReviewItem>,
    pub normalization: NormalizationStats,
    pub candidates: Vec<CandidatePair>,
    pub blocking: BlockingStats,
    pub scores: Vec<SimilarityScore>,
    pub scorer: SimilarityScorer,
    pub timings: Vec<PhaseTiming>,
}

/// Services for deduplication runs: normalizer and feature cache are built
/// once and reused by every run of this engine.
pub struct DedupEngine {
    config: DedupConfig,
    normalizer: ProductNormalizer,
    cache: SharedFeatureCache,
    progress: ProgressConfig,
    deadline: Deadline,
}

impl DedupEngine {
    pub fn new(config: DedupConfig, progress: ProgressConfig) -> Result<Self> {
        config.validate().context("Invalid deduplication configuration")?;
        let normalizer = ProductNormalizer::new(&config)?;
        let cache = create_shared_feature_cache(config.feature_cache_size);
        Ok(Self {
            config,
            normalizer,
            cache,
            progress,
            deadline: Deadline::none(),
        })
    }

    /// Runs fail with `DeadlineExceeded` once `deadline` passes. Checked between
    /// phases and by the workers of every parallel phase.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &ProductNormalizer {
        &self.normalizer
    }

    /// (hits, misses, hit rate) of the feature cache so far.
    pub fn cache_stats(&self) -> (usize, usize, f64) {
        let guard = feature_cache::lock_cache(&self.cache);
        let (hits, misses) = guard.get_stats();
        (hits, misses, guard.hit_rate())
    }

    fn log_memory(&self, phase: &str) {
        if self.progress.should_show_memory() {
            info!("Memory usage after {}: {} MB", phase, get_memory_usage());
        }
    }

    fn checkpoints(&self, fingerprint: &str) -> Option<CheckpointStore> {
        self.config
            .checkpoint_dir
            .as_ref()
            .map(|dir| CheckpointStore::new(dir, fingerprint))
    }

    /// Normalization, blocking and pair scoring.
    pub fn score_records(
        &self,
        mut raw: Vec<RawProductRecord>,
        source: SupplementalSource,
        mp: Option<&MultiProgress>,
    ) -> Result<ScoredRun> {
        let mp = mp.filter(|_| self.progress.should_show_detailed());
        let mut timings = Vec::new();
        raw.sort_by(|a, b| a.id.cmp(&b.id));
        let fingerprint = run_fingerprint(&raw, &self.config, &source.identity())?;
        let checkpoints = self.checkpoints(&fingerprint);

        self.deadline.check("normalization")?;
        let phase_start = Instant::now();
        info!("Phase 1: normalizing {} records", raw.len());
        let pb = phase_bar(mp, raw.len() as u64, "Normalizing descriptions");
        let batch = normalize_records(&self.normalizer, &raw, &self.cache, &self.deadline, pb.as_ref())?;
        timings.push(timing("normalization", phase_start));
        self.log_memory("normalization");
        if self.progress.should_show_cache_stats() {
            let (hits, misses, rate) = self.cache_stats();
            let (entries, capacity) = feature_cache::lock_cache(&self.cache).get_cache_info();
            info!(
                "Feature cache: {} hits, {} misses ({:.1}% hit rate), {}/{} entries",
                hits,
                misses,
                rate * 100.0,
                entries,
                capacity
            );
        }

        let mut scorer = SimilarityScorer::new(&self.config);
        match source {
            SupplementalSource::RuleBasedOnly => {}
            SupplementalSource::Embedding(provider) => {
                let embeddings = EmbeddingScorer::prepare(provider.as_ref(), &batch.records);
                if embeddings.is_empty() && !batch.records.is_empty() {
                    warn!("Embedding provider produced no vectors; scores fall back to rule-based");
                }
                scorer = scorer.with_supplemental(Box::new(embeddings));
            }
            SupplementalSource::Classifier(model) => {
                scorer = scorer.with_supplemental(Box::new(ClassifierScorer::new(model)));
            }
        }

        let phase_start = Instant::now();
        let resumed = checkpoints.as_ref().and_then(|c| c.load_scoring());
        let (candidates, blocking, scores) = match resumed {
            Some(checkpoint) => (checkpoint.candidates, checkpoint.blocking, checkpoint.scores),
            None => {
                self.deadline.check("blocking")?;
                info!("Phase 2: generating candidate pairs");
                let pb = phase_bar(mp, 0, "Blocking");
                let candidate_set = generate_candidates(&batch.records, &self.config.blocking, pb.as_ref());

                self.deadline.check("scoring")?;
                info!("Phase 3: scoring {} candidate pairs", candidate_set.pairs.len());
                let pb = phase_bar(mp, candidate_set.pairs.len() as u64, "Scoring pairs");
                let scores = score_candidates(
                    &scorer,
                    &batch.records,
                    &candidate_set.pairs,
                    &self.deadline,
                    pb.as_ref(),
                )
                .context("Failed to score candidate pairs")?;

                if let Some(store) = &checkpoints {
                    let checkpoint = ScoringCheckpoint {
                        fingerprint: fingerprint.clone(),
                        candidates: candidate_set.pairs,
                        blocking: candidate_set.stats,
                        scores,
                    };
                    if let Err(e) = store.save_scoring(&checkpoint) {
                        warn!("Could not save scoring checkpoint: {:#}", e);
                    }
                    (checkpoint.candidates, checkpoint.blocking, checkpoint.scores)
                } else {
                    (candidate_set.pairs, candidate_set.stats, scores)
                }
            }
        };
        timings.push(timing("blocking_and_scoring", phase_start));
        self.log_memory("scoring");

        Ok(ScoredRun {
            fingerprint,
            total_raw_records: raw.len(),
            records: batch.records,
            skipped: batch.skipped,
            normalization: batch.stats,
            candidates,
            blocking,
            scores,
            scorer,
            timings,
        })
    }

    /// A complete deduplication run, from raw records to catalog and report.
    pub fn run(
        &self,
        raw: Vec<RawProductRecord>,
        source: SupplementalSource,
        mp: Option<&MultiProgress>,
    ) -> Result<RunOutput> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Starting deduplication run {}", run_id);

        let scored = self.score_records(raw, source, mp)?;
        let mp = mp.filter(|_| self.progress.should_show_detailed());
        let mut timings = scored.timings.clone();
        let checkpoints = self.checkpoints(&scored.fingerprint);

        let phase_start = Instant::now();
        let resumed = checkpoints.as_ref().and_then(|c| c.load_clustering());
        let (clusters, cluster_reviews): (Vec<Cluster>, Vec<ReviewItem>) = match resumed {
            Some(checkpoint) => (checkpoint.clusters, checkpoint.review_items),
            None => {
                self.deadline.check("clustering")?;
                info!("Phase 4: building clusters");
                let lookup = ScoreLookup::new(&scored.scores).with_recompute(&scored.scorer, &scored.records);
                let pb = phase_bar(mp, 0, "Clustering partitions");
                let outcome = build_clusters(
                    &scored.records,
                    &scored.scores,
                    &lookup,
                    &self.config,
                    &self.deadline,
                    pb.as_ref(),
                )?;
                if let Some(store) = &checkpoints {
                    let checkpoint = ClusteringCheckpoint {
                        fingerprint: scored.fingerprint.clone(),
                        clusters: outcome.clusters.clone(),
                        review_items: outcome.review_items.clone(),
                    };
                    if let Err(e) = store.save_clustering(&checkpoint) {
                        warn!("Could not save clustering checkpoint: {:#}", e);
                    }
                }
                (outcome.clusters, outcome.review_items)
            }
        };
        timings.push(timing("clustering", phase_start));
        self.log_memory("clustering");

        self.deadline.check("master_products")?;
        let phase_start = Instant::now();
        info!("Phase 5: building master products from {} clusters", clusters.len());
        let catalog = build_master_products(&clusters, &scored.records, &self.normalizer, &self.config);
        timings.push(timing("master_products", phase_start));

        self.deadline.check("quality_report")?;
        let phase_start = Instant::now();
        let mut review_items = scored.skipped;
        review_items.extend(cluster_reviews);
        review_items.extend(catalog.review_items);
        let report = build_quality_report(
            ReportInputs {
                total_raw_records: scored.total_raw_records,
                clustered_records: scored.records.len(),
                masters: &catalog.masters,
                review_items,
                normalization: scored.normalization,
                blocking: scored.blocking,
            },
            &self.config,
        );
        timings.push(timing("quality_report", phase_start));

        Ok(RunOutput {
            run_id,
            fingerprint: scored.fingerprint,
            started_at,
            finished_at: Utc::now(),
            masters: catalog.masters,
            mappings: catalog.mappings,
            report,
            timings,
        })
    }
}

/// One rule-based run with progress output disabled.
pub fn run_deduplication(raw: Vec<RawProductRecord>, config: &DedupConfig) -> Result<RunOutput> {
    let engine = DedupEngine::new(config.clone(), ProgressConfig::disabled())?;
    engine.run(raw, SupplementalSource::RuleBasedOnly, None)
}

fn timing(phase: &str, start: Instant) -> PhaseTiming {
    PhaseTiming {
        phase: phase.to_string(),
        seconds: start.elapsed().as_secs_f64(),
    }
}

pub fn log_timing_summary(timings: &[PhaseTiming]) {
    let total: f64 = timings.iter().map(|t| t.seconds).sum();
    info!("=== Phase Timing Summary ===");
    for t in timings {
        info!("  {}: {:.3}s", t.phase, t.seconds);
    }
    info!("  Total: {:.3}s", total);
}
