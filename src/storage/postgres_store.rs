// src/storage/postgres_store.rs
use anyhow::{Context, Result};
use log::info;
use tokio_postgres::types::ToSql;

use crate::errors::DedupError;
use crate::models::RawProductRecord;
use crate::pipeline::RunOutput;
use crate::storage::{unavailable, ProductStore};
use crate::utils::db_connect::{connect, PgPool};

const BATCH_SIZE_DB_OPS: usize = 500;

/// Reads `public.raw_product`; writes `catalog.master_product`,
/// `catalog.product_mapping` and `catalog.quality_report`.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the POSTGRES_* environment variables.
    pub async fn from_env() -> Result<Self, DedupError> {
        let pool = connect().await.map_err(unavailable)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_raw_records(&self) -> Result<Vec<RawProductRecord>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = "
            SELECT id, establishment_id, local_code, local_description, local_unit,
                   occurrence_count, known_prices
            FROM public.raw_product
            ORDER BY id
        ";
        let rows = conn
            .query(query, &[])
            .await
            .context("Failed to query public.raw_product")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let occurrence_count: i64 = row.get("occurrence_count");
            let known_prices: Option<Vec<f64>> = row.get("known_prices");
            records.push(RawProductRecord {
                id: row.get("id"),
                establishment_id: row.get("establishment_id"),
                local_code: row.get("local_code"),
                local_description: row.get("local_description"),
                local_unit: row.get("local_unit"),
                occurrence_count: occurrence_count.max(0) as u64,
                known_prices: known_prices.unwrap_or_default(),
            });
        }
        info!("Fetched {} raw product records", records.len());
        Ok(records)
    }

    /// Replaces the previous run's catalog inside one transaction.
    async fn store_run(&self, output: &RunOutput) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .context("Failed to get DB client for storing run output")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start transaction for run output")?;

        transaction
            .execute("DELETE FROM catalog.product_mapping", &[])
            .await
            .context("Failed to clear catalog.product_mapping")?;
        transaction
            .execute("DELETE FROM catalog.master_product", &[])
            .await
            .context("Failed to clear catalog.master_product")?;

        for chunk in output.masters.chunks(BATCH_SIZE_DB_OPS) {
            let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
            let mut values = Vec::new();
            let mut i = 1;
            for m in chunk {
                values.push(format!(
                    "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, CURRENT_TIMESTAMP)",
                    i, i + 1, i + 2, i + 3, i + 4, i + 5, i + 6, i + 7, i + 8, i + 9, i + 10, i + 11, i + 12, i + 13, i + 14
                ));
                params.push(Box::new(m.master_id.clone()));
                params.push(Box::new(m.canonical_description.clone()));
                params.push(Box::new(m.alternative_descriptions.iter().cloned().collect::<Vec<String>>()));
                params.push(Box::new(m.category.clone()));
                params.push(Box::new(m.brand.clone()));
                params.push(Box::new(m.unit.clone()));
                params.push(Box::new(m.avg_price));
                params.push(Box::new(m.min_price));
                params.push(Box::new(m.max_price));
                params.push(Box::new(m.price_variance));
                params.push(Box::new(m.total_occurrences as i64));
                params.push(Box::new(m.establishments_count as i32));
                params.push(Box::new(m.confidence_score));
                params.push(Box::new(m.quality_score));
                params.push(Box::new(output.run_id.clone()));
                i += 15;
            }
            let query = format!(
                "INSERT INTO catalog.master_product (id, canonical_description, alternative_descriptions, category, brand, unit,
                    avg_price, min_price, max_price, price_variance, total_occurrences, establishments_count,
                    confidence_score, quality_score, run_id, created_at) VALUES {}",
                values.join(", ")
            );
            let params_slice: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                .collect();
            transaction
                .execute(&query, &params_slice[..])
                .await
                .context("Failed to batch insert catalog.master_product records")?;
        }

        for chunk in output.mappings.chunks(BATCH_SIZE_DB_OPS) {
            let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
            let mut values = Vec::new();
            let mut i = 1;
            for row in chunk {
                values.push(format!(
                    "(${}, ${}, ${}, ${}, ${}, ${})",
                    i, i + 1, i + 2, i + 3, i + 4, i + 5
                ));
                params.push(Box::new(row.raw_id.clone()));
                params.push(Box::new(row.master_id.clone()));
                params.push(Box::new(row.establishment_id.clone()));
                params.push(Box::new(row.original_description.clone()));
                params.push(Box::new(row.normalized_text.clone()));
                params.push(Box::new(output.run_id.clone()));
                i += 6;
            }
            let query = format!(
                "INSERT INTO catalog.product_mapping (raw_id, master_id, establishment_id, original_description, normalized_text, run_id)
                 VALUES {}",
                values.join(", ")
            );
            let params_slice: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                .collect();
            transaction
                .execute(&query, &params_slice[..])
                .await
                .context("Failed to batch insert catalog.product_mapping records")?;
        }

        let report = serde_json::to_value(&output.report).context("Failed to serialize quality report")?;
        let timings = serde_json::to_value(&output.timings).context("Failed to serialize phase timings")?;
        transaction
            .execute(
                "INSERT INTO catalog.quality_report (run_id, fingerprint, started_at, finished_at, report, timings)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &output.run_id,
                    &output.fingerprint,
                    &output.started_at,
                    &output.finished_at,
                    &report,
                    &timings,
                ],
            )
            .await
            .context("Failed to insert catalog.quality_report")?;

        transaction
            .commit()
            .await
            .context("Failed to commit run output")?;
        info!(
            "Stored {} master products and {} mapping rows for run {}",
            output.masters.len(),
            output.mappings.len(),
            output.run_id
        );
        Ok(())
    }
}

impl ProductStore for PostgresStore {
    async fn load_raw_records(&self) -> Result<Vec<RawProductRecord>, DedupError> {
        self.fetch_raw_records().await.map_err(unavailable)
    }

    async fn persist_run(&self, output: &RunOutput) -> Result<(), DedupError> {
        self.store_run(output).await.map_err(unavailable)
    }
}
