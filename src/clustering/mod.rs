// src/clustering/mod.rs
pub mod create_clusters;
pub mod union_find;

pub use create_clusters::{build_clusters, ClusteringOutcome, PairSimilarity, ScoreLookup};
pub use union_find::UnionFind;
