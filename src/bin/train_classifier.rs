// src/bin/train_classifier.rs
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use dedupe_lib::learning::{
    labeled_examples, suggest_threshold, train_classifier, LabelingTask, PairClassifier,
    TrainingStore,
};
use dedupe_lib::utils::config::DedupConfig;
use dedupe_lib::utils::env::load_env;

#[derive(Parser)]
#[command(author, version, about = "Train the pair classifier from labeled examples", long_about = None)]
struct TrainArgs {
    /// Labeled batch written by suggest_labels; answered pairs are appended to the training store first
    #[arg(long)]
    import: Option<PathBuf>,

    /// Training store path (defaults to TRAINING_STORE_PATH)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Model output path (defaults to CLASSIFIER_MODEL_PATH)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Train and report metrics without saving the model
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = TrainArgs::parse();

    let mut config = DedupConfig::from_env().context("Failed to load deduplication configuration")?;
    if let Some(path) = &args.store {
        config.active_learning.training_store_path = path.clone();
    }
    if let Some(path) = &args.model {
        config.active_learning.model_path = path.clone();
    }
    let store = TrainingStore::new(&config.active_learning.training_store_path);

    if let Some(path) = &args.import {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labeling batch {}", path.display()))?;
        let tasks: Vec<LabelingTask> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse labeling batch {}", path.display()))?;
        let examples = labeled_examples(&tasks);
        if examples.len() < tasks.len() {
            warn!(
                "{} of {} pairs in {} have no label and were skipped",
                tasks.len() - examples.len(),
                tasks.len(),
                path.display()
            );
        }
        store.append(&examples)?;
        info!("Imported {} labels into {}", examples.len(), store.path().display());
    }

    let examples = store.latest_labels()?;
    info!("Training on {} labeled pairs from {}", examples.len(), store.path().display());

    let suggestion = suggest_threshold(&examples, &config.weights, &config.active_learning);
    let mut model = train_classifier(&examples, &config.active_learning)?;

    match &model.holdout_metrics {
        Some(m) => println!(
            "holdout: n={} accuracy={:.3} precision={:.3} recall={:.3} f1={:.3}",
            m.support, m.accuracy, m.precision, m.recall, m.f1
        ),
        None => println!("holdout: none"),
    }
    match &suggestion.metrics {
        Some(m) => println!(
            "suggested threshold: {:.2} (rule-based f1={:.3} over {} labels; current {:.2})",
            suggestion.threshold, m.f1, suggestion.examples_used, config.threshold
        ),
        None => println!(
            "suggested threshold: {:.2} (default; too few labels)",
            suggestion.threshold
        ),
    }

    if args.dry_run {
        info!("Dry run: model not saved");
        return Ok(());
    }
    let model_path = &config.active_learning.model_path;
    if let Some(previous) = PairClassifier::load(model_path)? {
        model.version = previous.version;
    }
    model.save(model_path)?;
    println!("saved model v{} to {}", model.version, model_path.display());
    Ok(())
}
