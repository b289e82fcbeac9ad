// src/pipeline/checkpoint.rs
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::models::{BlockingStats, CandidatePair, Cluster, RawProductRecord, ReviewItem, SimilarityScore};
use crate::utils::config::DedupConfig;

/// Content signature of a run's inputs. Any change to the records, the
/// configuration or the supplemental scorer's identity yields a different fingerprint.
pub fn run_fingerprint(
    records: &[RawProductRecord],
    config: &DedupConfig,
    supplemental: &str,
) -> Result<String> {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(serde_json::to_vec(record).context("Failed to serialize record for fingerprint")?);
        hasher.update([0x1e]);
    }
    // none of these change results
    let mut effective = config.clone();
    effective.checkpoint_dir = None;
    effective.run_timeout_secs = None;
    effective.worker_threads = 0;
    hasher.update(serde_json::to_vec(&effective).context("Failed to serialize config for fingerprint")?);
    hasher.update(supplemental.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Candidate pairs and their scores, saved after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringCheckpoint {
    pub fingerprint: String,
    pub candidates: Vec<CandidatePair>,
    pub blocking: BlockingStats,
    pub scores: Vec<SimilarityScore>,
}

/// Clusters and the review items raised while building them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringCheckpoint {
    pub fingerprint: String,
    pub clusters: Vec<Cluster>,
    pub review_items: Vec<ReviewItem>,
}

pub struct CheckpointStore {
    dir: PathBuf,
    fingerprint: String,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P, fingerprint: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fingerprint: fingerprint.to_string(),
        }
    }

    fn path_for(&self, phase: &str) -> PathBuf {
        let short = &self.fingerprint[..self.fingerprint.len().min(16)];
        self.dir.join(format!("{}_{}.json", short, phase))
    }

    pub fn load_scoring(&self) -> Option<ScoringCheckpoint> {
        self.load::<ScoringCheckpoint>("scoring")
            .filter(|c| c.fingerprint == self.fingerprint)
    }

    pub fn save_scoring(&self, checkpoint: &ScoringCheckpoint) -> Result<()> {
        self.save("scoring", checkpoint)
    }

    pub fn load_clustering(&self) -> Option<ClusteringCheckpoint> {
        self.load::<ClusteringCheckpoint>("clustering")
            .filter(|c| c.fingerprint == self.fingerprint)
    }

    pub fn save_clustering(&self, checkpoint: &ClusteringCheckpoint) -> Result<()> {
        self.save("clustering", checkpoint)
    }

    /// A missing or unreadable checkpoint just means recomputation.
    fn load<T: DeserializeOwned>(&self, phase: &str) -> Option<T> {
        let path = self.path_for(phase);
        if !path.exists() {
            debug!("No {} checkpoint at {}", phase, path.display());
            return None;
        }
        let parsed = std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(anyhow::Error::from));
        match parsed {
            Ok(value) => {
                info!("Resuming from {} checkpoint {}", phase, path.display());
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save<T: Serialize>(&self, phase: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", self.dir.display()))?;
        let path = self.path_for(phase);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value).context("Failed to serialize checkpoint")?;
        std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move checkpoint into place at {}", path.display()))?;
        info!("Saved {} checkpoint to {}", phase, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let records = vec![RawProductRecord::new("1", "e1", "Arroz 5kg")];
        let config = DedupConfig::default();
        let base = run_fingerprint(&records, &config, "rule_based").unwrap();
        assert_eq!(base, run_fingerprint(&records, &config, "rule_based").unwrap());

        let mut tuned = config.clone();
        tuned.threshold = 0.85;
        assert_ne!(base, run_fingerprint(&records, &tuned, "rule_based").unwrap());

        let mut moved = config.clone();
        moved.checkpoint_dir = Some(PathBuf::from("/tmp/elsewhere"));
        assert_eq!(base, run_fingerprint(&records, &moved, "rule_based").unwrap());

        assert_ne!(base, run_fingerprint(&records, &config, "embedding_cosine:hashed-trigram-256").unwrap());
    }

    #[test]
    fn test_checkpoints_only_load_for_their_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "abc123");
        assert!(store.load_clustering().is_none());

        let checkpoint = ClusteringCheckpoint {
            fingerprint: "abc123".to_string(),
            clusters: vec![Cluster::singleton("r1", None)],
            review_items: Vec::new(),
        };
        store.save_clustering(&checkpoint).unwrap();
        assert_eq!(store.load_clustering(), Some(checkpoint));

        let other = CheckpointStore::new(dir.path(), "abc999");
        assert!(other.load_clustering().is_none());
    }
}
