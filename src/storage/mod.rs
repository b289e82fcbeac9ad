// src/storage/mod.rs
pub mod json_store;
pub mod postgres_store;

use std::future::Future;

use crate::errors::DedupError;
use crate::models::RawProductRecord;
use crate::pipeline::RunOutput;

pub use json_store::JsonFileStore;
pub use postgres_store::PostgresStore;

/// Where raw records come from and where a run's results go.
///
/// Failures surface as `DedupError::StorageUnavailable`, which aborts the run.
/// `persist_run` writes everything or nothing.
pub trait ProductStore: Send + Sync {
    /// All raw records, ordered by id.
    fn load_raw_records(&self) -> impl Future<Output = Result<Vec<RawProductRecord>, DedupError>> + Send;

    fn persist_run(&self, output: &RunOutput) -> impl Future<Output = Result<(), DedupError>> + Send;
}

/// Wraps any error chain as a fatal storage failure.
pub(crate) fn unavailable(err: anyhow::Error) -> DedupError {
    DedupError::StorageUnavailable(format!("{:#}", err))
}
