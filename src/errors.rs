// src/errors.rs
use thiserror::Error;

use crate::models::core::UnitClass;

/// Failure kinds the deduplication engine distinguishes.
///
/// `StorageUnavailable` and `DeadlineExceeded` are fatal for a run. The record- and cluster-level
/// variants are collected into the quality report's manual-review queue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DedupError {
    #[error("malformed record {record_id}: {reason}")]
    MalformedRecord { record_id: String, reason: String },

    #[error(
        "unit classes {class_a} and {class_b} cannot share a cluster (records {record_id_a} and {record_id_b})"
    )]
    UnitIncompatibility {
        record_id_a: String,
        record_id_b: String,
        class_a: UnitClass,
        class_b: UnitClass,
    },

    #[error("need at least {required} labeled examples to train, have {available}")]
    TrainingDataInsufficient { required: usize, available: usize },

    #[error("storage collaborator unavailable: {0}")]
    StorageUnavailable(String),

    #[error("run exceeded its time limit during {phase}; nothing was written")]
    DeadlineExceeded { phase: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("score '{name}' = {value} is outside [0, 1]")]
    InvalidScore { name: String, value: f64 },
}

impl DedupError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DedupError::StorageUnavailable(_) | DedupError::DeadlineExceeded { .. }
        )
    }
}
