// src/bin/suggest_labels.rs
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use dedupe_lib::learning::{labeling_batch, select_uncertain_pairs, TrainingStore};
use dedupe_lib::pipeline::{DedupEngine, SupplementalSource};
use dedupe_lib::storage::{JsonFileStore, PostgresStore, ProductStore};
use dedupe_lib::utils::config::DedupConfig;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_config::ProgressConfig;
use dedupe_lib::utils::init_worker_pool;

#[derive(Parser)]
#[command(author, version, about = "Write the next batch of uncertain pairs for human labeling", long_about = None)]
struct SuggestArgs {
    /// Raw records JSON file (defaults to INPUT_PATH); ignored with --postgres
    #[arg(long)]
    input: Option<PathBuf>,

    /// Read raw records from PostgreSQL instead of a JSON file
    #[arg(long)]
    postgres: bool,

    /// Where to write the labeling batch
    #[arg(long, default_value = "label_batch.json")]
    output: PathBuf,

    /// Override the configured batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override the uncertainty band, e.g. --band 0.45 0.75
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    band: Option<Vec<f64>>,
}

async fn load_records(args: &SuggestArgs) -> Result<Vec<dedupe_lib::models::RawProductRecord>> {
    let records = if args.postgres {
        PostgresStore::from_env().await?.load_raw_records().await?
    } else {
        let store = match &args.input {
            Some(path) => JsonFileStore::new(path, "."),
            None => JsonFileStore::from_env(),
        };
        store.load_raw_records().await?
    };
    Ok(records)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = SuggestArgs::parse();
    let start = Instant::now();

    let mut config = DedupConfig::from_env().context("Failed to load deduplication configuration")?;
    if let Some(size) = args.batch_size {
        config.active_learning.batch_size = size;
    }
    if let Some(band) = &args.band {
        config.active_learning.band_low = band[0];
        config.active_learning.band_high = band[1];
    }
    config.log_config();
    init_worker_pool(config.worker_threads);

    let raw = load_records(&args).await.context("Failed to load raw product records")?;
    let store = TrainingStore::new(&config.active_learning.training_store_path);
    let labeled = store.labeled_pairs()?;
    info!("{} pairs already labeled in {}", labeled.len(), store.path().display());

    let active_learning = config.active_learning.clone();
    let engine = DedupEngine::new(config, ProgressConfig::from_env())?;
    let scored = tokio::task::spawn_blocking(move || {
        engine.score_records(raw, SupplementalSource::RuleBasedOnly, None)
    })
    .await
    .map_err(|e| anyhow!("Scoring task failed: {}", e))??;

    let selected = select_uncertain_pairs(&scored.scores, &labeled, &active_learning);
    let batch = labeling_batch(selected, &scored.records);
    let json = serde_json::to_string_pretty(&batch).context("Failed to serialize labeling batch")?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    info!(
        "Wrote {} pairs to {} from {} scored pairs in {:.2?}. Fill in \"label\" (same/different) and import with train_classifier --import.",
        batch.len(),
        args.output.display(),
        scored.scores.len(),
        start.elapsed()
    );
    Ok(())
}
