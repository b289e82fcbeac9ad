// src/matching/embedding.rs
use anyhow::{anyhow, Result};
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::matching::SupplementalScorer;
use crate::models::{NormalizedRecord, ScoreMethod};

pub const EMBEDDING_COSINE: &str = "embedding_cosine";

/// Turns text into a dense vector. Loading and disposing the underlying model
/// is the caller's business; the scorer only calls `embed`.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str {
        "custom"
    }
}

pub fn cosine_similarity(v1: &[f32], v2: &[f32]) -> Result<f64> {
    if v1.len() != v2.len() {
        return Err(anyhow!(
            "Input vector lengths differ: {} vs {}",
            v1.len(),
            v2.len()
        ));
    }
    if v1.is_empty() {
        return Err(anyhow!("Input vectors must not be empty"));
    }

    let (mut dot, mut mag1, mut mag2) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in v1.iter().zip(v2) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag1 += x * x;
        mag2 += y * y;
    }
    if mag1 == 0.0 || mag2 == 0.0 {
        return Ok(0.0);
    }
    let similarity = dot / (mag1.sqrt() * mag2.sqrt());
    if !similarity.is_finite() {
        warn!("Cosine similarity is not finite (dot {}, |v1|² {}, |v2|² {})", dot, mag1, mag2);
        return Ok(0.0);
    }
    Ok(similarity)
}

/// Cosine similarity of precomputed record embeddings, clamped to [0, 1].
pub struct EmbeddingScorer {
    embeddings: HashMap<String, Vec<f32>>,
}

impl EmbeddingScorer {
    /// Embeds every record's normalized text once, before the scoring loop.
    /// Records the provider fails on simply have no embedding signal.
    pub fn prepare(provider: &dyn EmbeddingProvider, records: &[NormalizedRecord]) -> Self {
        let mut embeddings = HashMap::with_capacity(records.len());
        let mut by_text: HashMap<&str, Option<Vec<f32>>> = HashMap::new();
        let mut failures = 0usize;

        for record in records {
            let text = record.features.normalized_text.as_str();
            let vector = by_text
                .entry(text)
                .or_insert_with(|| match provider.embed(text) {
                    Ok(v) if !v.is_empty() => Some(v),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Embedding failed for '{}': {}", text, e);
                        None
                    }
                })
                .clone();
            match vector {
                Some(v) => {
                    embeddings.insert(record.id().to_string(), v);
                }
                None => failures += 1,
            }
        }
        info!(
            "Prepared {} embeddings with model '{}' ({} records without embedding)",
            embeddings.len(),
            provider.model_name(),
            failures
        );
        Self { embeddings }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

impl SupplementalScorer for EmbeddingScorer {
    fn metric_name(&self) -> &'static str {
        EMBEDDING_COSINE
    }

    fn method(&self) -> ScoreMethod {
        ScoreMethod::Hybrid
    }

    fn score(
        &self,
        a: &NormalizedRecord,
        b: &NormalizedRecord,
        _rule_breakdown: &BTreeMap<String, f64>,
    ) -> Option<f64> {
        let ea = self.embeddings.get(a.id())?;
        let eb = self.embeddings.get(b.id())?;
        cosine_similarity(ea, eb).ok().map(|s| s.clamp(0.0, 1.0))
    }
}

/// Model-free provider: hashed character trigrams into a fixed number of buckets.
/// Catches abbreviations and spelling variants the token metrics miss.
pub struct HashedTrigramProvider {
    dimensions: usize,
    name: String,
}

impl HashedTrigramProvider {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("hashed-trigram-{}", dimensions),
        }
    }

    fn bucket(&self, gram: &str) -> usize {
        let digest = Sha256::digest(gram.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }
}

impl EmbeddingProvider for HashedTrigramProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let padded: Vec<char> = format!("#{}#", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                vector[self.bucket(&gram)] += 1.0;
            }
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
