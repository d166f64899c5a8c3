//! Load orchestration
//!
//! Moves a staged batch into its reconciled table with one of two
//! strategies, selected by configuration:
//! - synchronous MERGE (with key properties) or COPY (without)
//! - asynchronous managed ingestion through a temporary pipe, with bounded
//!   submission retries and history polling

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod backoff;
pub mod ingest;
mod merge;
mod snowpipe;

pub use backoff::{BackoffPolicy, ExponentialBackoff, LinearBackoff, Sleeper, ThreadSleeper};
pub use ingest::{
    IngestReport, IngestService, IngestedFile, InsertFilesResponse, SnowpipeClient, StagedFileRef,
};

use crate::config::{LoadMethod, LoaderConfig};
use crate::database::{ErrorClassifier, SnowflakeErrorClassifier, Warehouse, query, sql};
use crate::error::LoaderResult;
use crate::models::StagedBatch;
use crate::stream::StreamContext;

/// Outcome of loading one staged batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Rows inserted
    pub inserts: u64,
    /// Rows updated (MERGE only)
    pub updates: u64,
    /// Staged file size
    pub size_bytes: u64,
    /// Rows parsed by managed ingestion
    pub rows_parsed: Option<u64>,
    /// Completion status reported by managed ingestion
    pub status: Option<String>,
}

/// Drives the configured load strategy for staged batches
pub struct LoadOrchestrator<'a> {
    config: &'a LoaderConfig,
    warehouse: &'a dyn Warehouse,
    classifier: Arc<dyn ErrorClassifier>,
    ingest: Option<Arc<dyn IngestService>>,
    sleeper: Arc<dyn Sleeper>,
    submit_backoff: ExponentialBackoff,
    poll_backoff: LinearBackoff,
}

impl<'a> LoadOrchestrator<'a> {
    /// Orchestrator with real sleeping and backoffs taken from `config`
    ///
    /// Managed ingestion builds its own [`SnowpipeClient`] from the
    /// configured signing key unless one is supplied.
    pub fn new(config: &'a LoaderConfig, warehouse: &'a dyn Warehouse) -> Self {
        Self {
            config,
            warehouse,
            classifier: Arc::new(SnowflakeErrorClassifier),
            ingest: None,
            sleeper: Arc::new(ThreadSleeper),
            submit_backoff: ExponentialBackoff::new(Duration::from_secs(
                config.retry_max_delay_secs,
            )),
            poll_backoff: LinearBackoff::new(
                Duration::from_secs(config.poll_initial_delay_secs),
                Duration::from_secs(config.poll_increment_secs),
            ),
        }
    }

    pub fn with_ingest_service(mut self, ingest: Arc<dyn IngestService>) -> Self {
        self.ingest = Some(ingest);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Load a staged batch into the stream's table
    pub fn load(&self, ctx: &StreamContext, batch: &StagedBatch) -> LoaderResult<LoadReport> {
        info!(
            "Loading {} rows into '{}'",
            batch.row_count,
            ctx.table().qualified_name()
        );

        match self.config.load_method() {
            LoadMethod::Merge => self.load_merge(ctx, batch),
            LoadMethod::Snowpipe => self.load_snowpipe(ctx, batch),
        }
    }

    /// Delete rows flagged as deleted at the source
    ///
    /// Returns the number of rows removed.
    pub fn delete_rows(&self, ctx: &StreamContext) -> LoaderResult<u64> {
        let statement = sql::delete_flagged_rows(&ctx.table().qualified_name());
        info!(
            "Deleting rows from '{}' table... {}",
            ctx.table().qualified_name(),
            statement
        );

        let result = query(self.warehouse, ctx.session(), statement, 0)?;
        let deleted = result.first_row_count("number of rows deleted");
        info!("DELETE {}", deleted);
        Ok(deleted)
    }
}
