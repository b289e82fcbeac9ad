// src/candidate_generation/mod.rs
pub mod candidate_generation;

pub use candidate_generation::{generate_candidates, BlockingStrategy, CandidateSet};
