pub mod core;
pub mod stats_models;

pub use self::core::{
    CandidatePair, Cluster, MappingRow, MasterProduct, MergeEdge, NormalizedFeatures,
    NormalizedRecord, PairKey, PairLabel, RawProductRecord, ScoreMethod, SimilarityScore,
    TrainingExample, UnitClass,
};
pub use self::stats_models::{
    BlockingStats, HistogramBucket, NormalizationStats, QualityReport, ReviewItem, ReviewKind,
};
