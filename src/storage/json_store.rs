// src/storage/json_store.rs
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::errors::DedupError;
use crate::models::RawProductRecord;
use crate::pipeline::RunOutput;
use crate::storage::{unavailable, ProductStore};

pub const MASTERS_FILE: &str = "master_products.json";
pub const MAPPINGS_FILE: &str = "product_mapping.json";
pub const REPORT_FILE: &str = "quality_report.json";
pub const RUN_FILE: &str = "run.json";

/// Reads a JSON array of raw records and writes run output as JSON files in a directory.
pub struct JsonFileStore {
    input_path: PathBuf,
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    run_id: &'a str,
    fingerprint: &'a str,
    started_at: String,
    finished_at: String,
    master_products: usize,
    mappings: usize,
    timings: &'a [crate::pipeline::PhaseTiming],
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input_path: P, output_dir: Q) -> Self {
        Self {
            input_path: input_path.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn from_env() -> Self {
        let input = std::env::var("INPUT_PATH").unwrap_or_else(|_| "data/raw_products.json".to_string());
        let output = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string());
        Self::new(input, output)
    }

    async fn read_records(&self) -> Result<Vec<RawProductRecord>> {
        let raw = tokio::fs::read(&self.input_path)
            .await
            .with_context(|| format!("Failed to read {}", self.input_path.display()))?;
        let mut records: Vec<RawProductRecord> = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse {}", self.input_path.display()))?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        info!("Loaded {} raw records from {}", records.len(), self.input_path.display());
        Ok(records)
    }

    /// Writes every file to a staging directory first, then renames them into
    /// place, so a failure leaves the previous output untouched.
    async fn write_output(&self, output: &RunOutput) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let staging = self.output_dir.join(format!(".staging-{}", output.run_id));
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let metadata = RunMetadata {
            run_id: &output.run_id,
            fingerprint: &output.fingerprint,
            started_at: output.started_at.to_rfc3339(),
            finished_at: output.finished_at.to_rfc3339(),
            master_products: output.masters.len(),
            mappings: output.mappings.len(),
            timings: &output.timings,
        };
        let files = vec![
            (MASTERS_FILE, serde_json::to_vec_pretty(&output.masters)?),
            (MAPPINGS_FILE, serde_json::to_vec_pretty(&output.mappings)?),
            (REPORT_FILE, serde_json::to_vec_pretty(&output.report)?),
            (RUN_FILE, serde_json::to_vec_pretty(&metadata)?),
        ];

        let staged = async {
            for (name, bytes) in &files {
                let path = staging.join(name);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if let Err(e) = staged {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                warn!("Failed to remove staging dir {}: {}", staging.display(), cleanup);
            }
            return Err(e);
        }

        for (name, _) in &files {
            let target = self.output_dir.join(name);
            tokio::fs::rename(staging.join(name), &target)
                .await
                .with_context(|| format!("Failed to move {} into place", target.display()))?;
        }
        tokio::fs::remove_dir(&staging)
            .await
            .with_context(|| format!("Failed to remove {}", staging.display()))?;
        info!(
            "Wrote {} master products and {} mapping rows to {}",
            output.masters.len(),
            output.mappings.len(),
            self.output_dir.display()
        );
        Ok(())
    }
}

impl ProductStore for JsonFileStore {
    async fn load_raw_records(&self) -> Result<Vec<RawProductRecord>, DedupError> {
        self.read_records().await.map_err(unavailable)
    }

    async fn persist_run(&self, output: &RunOutput) -> Result<(), DedupError> {
        self.write_output(output).await.map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MasterProduct;
    use crate::pipeline::run_deduplication;
    use crate::utils::config::DedupConfig;

    fn write_input(dir: &Path) -> PathBuf {
        let path = dir.join("raw.json");
        let json = r#"[
            {"id": "b", "establishment_id": "e2", "local_description": "Arroz Tio Joao 5 Kg", "occurrence_count": 2, "known_prices": [24.0]},
            {"id": "a", "establishment_id": "e1", "local_description": "ARROZ TIO JOAO 5KG"},
            {"id": "c", "establishment_id": "e1", "local_description": "Leite Integral 1L", "local_unit": "LT"}
        ]"#;
        std::fs::write(&path, json).unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_sorts_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(write_input(dir.path()), dir.path().join("out"));
        let records = store.load_raw_records().await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(records[0].occurrence_count, 1);
        assert!(records[0].known_prices.is_empty());
        assert_eq!(records[2].local_unit.as_deref(), Some("LT"));
    }

    #[tokio::test]
    async fn test_missing_input_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope.json"), dir.path().join("out"));
        let err = store.load_raw_records().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_persist_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let store = JsonFileStore::new(write_input(dir.path()), &out);
        let records = store.load_raw_records().await.unwrap();
        let output = run_deduplication(records, &DedupConfig::default()).unwrap();
        store.persist_run(&output).await.unwrap();

        for name in [MASTERS_FILE, MAPPINGS_FILE, REPORT_FILE, RUN_FILE] {
            assert!(out.join(name).exists(), "{} missing", name);
        }
        let masters: Vec<MasterProduct> =
            serde_json::from_slice(&std::fs::read(out.join(MASTERS_FILE)).unwrap()).unwrap();
        assert_eq!(masters, output.masters);
        let leftovers = std::fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
