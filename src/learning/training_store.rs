// src/learning/training_store.rs
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::{PairKey, TrainingExample};

/// Append-only JSON-lines file of labeled pairs. Existing lines are never rewritten.
pub struct TrainingStore {
    path: PathBuf,
}

impl TrainingStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, examples: &[TrainingExample]) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open training store {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        for example in examples {
            let line = serde_json::to_string(example).context("Failed to serialize training example")?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush().context("Failed to flush training store")?;
        info!("Appended {} labeled pairs to {}", examples.len(), self.path.display());
        Ok(())
    }

    /// Every example in file order. Unparseable lines are skipped with a warning.
    pub fn load(&self) -> Result<Vec<TrainingExample>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open training store {}", self.path.display()))?;
        let mut examples = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrainingExample>(&line) {
                Ok(example) => examples.push(example),
                Err(e) => warn!("{}:{}: skipping bad training example: {}", self.path.display(), line_no + 1, e),
            }
        }
        Ok(examples)
    }

    /// The most recent label for each pair, ordered by pair.
    pub fn latest_labels(&self) -> Result<Vec<TrainingExample>> {
        let mut latest: BTreeMap<PairKey, TrainingExample> = BTreeMap::new();
        for example in self.load()? {
            latest.insert(example.pair.clone(), example);
        }
        Ok(latest.into_values().collect())
    }

    pub fn labeled_pairs(&self) -> Result<HashSet<PairKey>> {
        Ok(self.load()?.into_iter().map(|e| e.pair).collect())
    }
}
