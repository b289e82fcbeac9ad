// src/pipeline/mod.rs
pub mod checkpoint;
pub mod run;

pub use run::{
    log_timing_summary, run_deduplication, DedupEngine, PhaseTiming, RunOutput, ScoredRun,
    SupplementalSource,
};
