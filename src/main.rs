// src/main.rs
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use dedupe_lib::{
    learning::PairClassifier,
    matching::embedding::HashedTrigramProvider,
    pipeline::{log_timing_summary, DedupEngine, PhaseTiming, RunOutput, SupplementalSource},
    storage::{JsonFileStore, PostgresStore, ProductStore},
    utils::{
        config::DedupConfig,
        db_connect::get_pool_status,
        deadline::Deadline,
        env::{env_or, load_env},
        get_memory_usage, init_worker_pool,
        progress_config::{pipeline_bar, ProgressConfig},
    },
};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting product deduplication pipeline");
    load_env();

    let config = DedupConfig::from_env().context("Failed to load deduplication configuration")?;
    config.log_config();
    let progress = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}",
        progress.enabled, progress.detailed
    );
    init_worker_pool(config.worker_threads);

    let source = supplemental_source(&config)?;
    info!(
        "Supplemental scorer: {}",
        source.name().unwrap_or("none (rule-based only)")
    );

    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "json".to_string());
    match backend.to_lowercase().as_str() {
        "json" => {
            let store = JsonFileStore::from_env();
            run_with_store(&store, config, progress, source).await
        }
        "postgres" => {
            let store = PostgresStore::from_env()
                .await
                .context("Failed to connect to database")?;
            let (connections, idle) = get_pool_status(store.pool());
            info!("DB pool status: {} connections, {} idle", connections, idle);
            run_with_store(&store, config, progress, source).await
        }
        other => Err(anyhow!(
            "Unknown STORE_BACKEND '{}' (expected 'json' or 'postgres')",
            other
        )),
    }
}

fn supplemental_source(config: &DedupConfig) -> Result<SupplementalSource> {
    if config.active_learning.use_classifier {
        let path = &config.active_learning.model_path;
        return match PairClassifier::load(path)? {
            Some(model) => {
                info!("Loaded classifier v{} from {}", model.version, path.display());
                Ok(SupplementalSource::Classifier(model))
            }
            None => {
                warn!(
                    "USE_CLASSIFIER is set but no model exists at {}. Running rule-based only.",
                    path.display()
                );
                Ok(SupplementalSource::RuleBasedOnly)
            }
        };
    }
    match std::env::var("EMBEDDING_PROVIDER").ok().as_deref() {
        Some("hashing") => {
            let dimensions = env_or("EMBEDDING_DIMENSIONS", 256usize);
            Ok(SupplementalSource::Embedding(Box::new(
                HashedTrigramProvider::new(dimensions),
            )))
        }
        Some(other) => Err(anyhow!("Unknown EMBEDDING_PROVIDER '{}'", other)),
        None => Ok(SupplementalSource::RuleBasedOnly),
    }
}

async fn run_with_store<S: ProductStore>(
    store: &S,
    config: DedupConfig,
    progress: ProgressConfig,
    source: SupplementalSource,
) -> Result<()> {
    let mp = progress.create_multi_progress();
    let main_pb = pipeline_bar(mp.as_ref(), 3);
    if let Some(pb) = &main_pb {
        pb.set_message("Loading raw records...");
    }

    let load_start = Instant::now();
    let raw = store
        .load_raw_records()
        .await
        .context("Failed to load raw product records")?;
    let load_time = load_start.elapsed();
    info!("Loaded {} raw records in {:.2?}", raw.len(), load_time);

    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message(format!("Deduplicating {} records...", raw.len()));
    }

    let deadline = Deadline::from_timeout_secs(config.run_timeout_secs);
    if deadline.is_set() {
        info!("Run time limit: {}s", config.run_timeout_secs.unwrap_or_default());
    }
    let engine = DedupEngine::new(config, progress)?.with_deadline(deadline);
    let engine_mp = mp.clone();
    let mut output: RunOutput =
        tokio::task::spawn_blocking(move || engine.run(raw, source, engine_mp.as_ref()))
            .await
            .context("Deduplication task panicked")??;
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message(format!("Persisting {} master products...", output.masters.len()));
    }

    let persist_start = Instant::now();
    store
        .persist_run(&output)
        .await
        .context("Failed to persist run output")?;
    output.timings.insert(
        0,
        PhaseTiming {
            phase: "load".to_string(),
            seconds: load_time.as_secs_f64(),
        },
    );
    output.timings.push(PhaseTiming {
        phase: "persist".to_string(),
        seconds: persist_start.elapsed().as_secs_f64(),
    });
    if let Some(pb) = &main_pb {
        pb.finish_with_message("Pipeline complete");
    }

    info!(
        "Run {} complete: {} raw records -> {} master products (dedup rate {:.1}%, {} review items)",
        output.run_id,
        output.report.total_raw_records,
        output.masters.len(),
        output.report.dedup_rate * 100.0,
        output.report.manual_review_queue.len()
    );
    info!("Final memory usage: {} MB", get_memory_usage());
    log_timing_summary(&output.timings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_lib::models::RawProductRecord;
    use dedupe_lib::storage::json_store::MASTERS_FILE;

    fn store_with_input(dir: &std::path::Path) -> JsonFileStore {
        let input = dir.join("raw.json");
        let records = vec![
            RawProductRecord::new("r1", "e1", "Arroz Tio Joao 5kg"),
            RawProductRecord::new("r2", "e2", "ARROZ TIO JOAO 5 KG"),
        ];
        std::fs::write(&input, serde_json::to_vec(&records).unwrap()).unwrap();
        JsonFileStore::new(input, dir.join("out"))
    }

    #[tokio::test]
    async fn test_timed_out_run_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_input(dir.path());
        let mut config = DedupConfig::default();
        config.run_timeout_secs = Some(0);

        let result = run_with_store(
            &store,
            config,
            ProgressConfig::disabled(),
            SupplementalSource::RuleBasedOnly,
        )
        .await;
        assert!(result.is_err());
        assert!(!dir.path().join("out").join(MASTERS_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_without_limit_persists_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_input(dir.path());
        run_with_store(
            &store,
            DedupConfig::default(),
            ProgressConfig::disabled(),
            SupplementalSource::RuleBasedOnly,
        )
        .await
        .unwrap();
        assert!(dir.path().join("out").join(MASTERS_FILE).exists());
    }
}
