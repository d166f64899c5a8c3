//! Managed ingestion strategy
//!
//! Created -> Submitted (bounded retries) -> Polling -> Completed. The pipe
//! is dropped once completion is observed; a crash before that leaves it
//! behind.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::ingest::{IngestService, IngestedFile, SnowpipeClient, StagedFileRef};
use super::{LoadOrchestrator, LoadReport};
use crate::auth::KeyPairAuth;
use crate::database::{WarehouseErrorKind, query, sql};
use crate::error::{LoaderError, LoaderResult};
use crate::models::StagedBatch;
use crate::stream::StreamContext;

impl LoadOrchestrator<'_> {
    pub(super) fn load_snowpipe(
        &self,
        ctx: &StreamContext,
        batch: &StagedBatch,
    ) -> LoaderResult<LoadReport> {
        info!("Loading data using Snowpipe.");

        let stage = self.config.stage.as_deref().ok_or_else(|| {
            LoaderError::Configuration(
                "Loading via snowpipe requires a named external stage".to_string(),
            )
        })?;

        let dbname = &self.config.dbname;
        let pipe = sql::pipe_name(dbname, ctx.table());
        self.create_pipe(ctx, &pipe, stage)?;

        let ingest = self.ingest_service()?;
        self.submit(ingest.as_ref(), &pipe, batch)?;
        let file = self.poll(ingest.as_ref(), &pipe, batch)?;

        info!(
            "Ingest Report for snowpipe: {} STATUS: {} rowsInserted(rowsParsed): {}({})",
            pipe, file.status, file.rows_inserted, file.rows_parsed
        );

        if let Err(e) = query(self.warehouse, ctx.session(), sql::drop_pipe(&pipe), 0) {
            warn!("Failed to drop snowpipe {}: {}", pipe, e);
        }

        Ok(LoadReport {
            inserts: file.rows_inserted,
            updates: 0,
            size_bytes: batch.size_bytes,
            rows_parsed: Some(file.rows_parsed),
            status: Some(file.status),
        })
    }

    fn create_pipe(&self, ctx: &StreamContext, pipe: &str, stage: &str) -> LoaderResult<()> {
        debug!("Creating snowpipe - {}.", pipe);

        if ctx.message().has_key_properties() {
            warn!(
                "Primary key {:?} found in the data stream. Snowpipe can not be used to \
                 consolidate records based upon keys. It can just copy data.",
                ctx.key_properties()
            );
        }

        let statement = sql::create_pipe(
            pipe,
            &self.config.dbname,
            ctx.table(),
            ctx.columns(),
            stage,
            &self.config.file_format,
        );

        match query(self.warehouse, ctx.session(), statement, 0) {
            Ok(_) => Ok(()),
            Err(e) if self.classifier.classify_loader_error(&e) == WarehouseErrorKind::AlreadyExists => {
                debug!("Snowpipe {} already exists: {}", pipe, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn ingest_service(&self) -> LoaderResult<Arc<dyn IngestService>> {
        if let Some(ingest) = &self.ingest {
            return Ok(ingest.clone());
        }

        let auth = KeyPairAuth::load(
            &self.config.account,
            &self.config.user,
            &self.config.private_key_path,
            self.config.private_key_password.as_deref(),
        )?;
        Ok(Arc::new(SnowpipeClient::new(&self.config.account, auth)?))
    }

    /// Submit the staged file, retrying transient failures
    ///
    /// `max_retry` counts every attempt; waits happen only between attempts.
    fn submit(
        &self,
        ingest: &dyn IngestService,
        pipe: &str,
        batch: &StagedBatch,
    ) -> LoaderResult<()> {
        let max_attempts = self.config.max_retry.max(1);
        let files = [StagedFileRef::new(batch.reference.clone())];
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            debug!(
                "Starting to ingest file via snowpipe, retries left {}",
                max_attempts - attempt
            );

            match ingest.insert_files(pipe, &files) {
                Ok(response) => {
                    info!(
                        "Snowpipe has received the files and will now start loading: {}",
                        response.response_code
                    );
                    return Ok(());
                }
                Err(LoaderError::TransientIngestion(message)) => {
                    error!("Snowpipe submission attempt {} failed: {}", attempt + 1, message);
                    last_error = message;
                    if attempt + 1 < max_attempts {
                        self.sleeper.sleep(self.submit_backoff.next_delay(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        error!("Max retry limit reached, Failed to load data using snowpipe");
        Err(LoaderError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Poll ingestion history until the submitted file shows up
    fn poll(
        &self,
        ingest: &dyn IngestService,
        pipe: &str,
        batch: &StagedBatch,
    ) -> LoaderResult<IngestedFile> {
        let mut attempt = 0;
        loop {
            let report = ingest.insert_report(pipe)?;
            if let Some(file) = report.find(&batch.reference) {
                return Ok(file.clone());
            }

            debug!("waiting for snowpipe to transfer data...");
            self.sleeper.sleep(self.poll_backoff.next_delay(attempt));
            attempt += 1;
        }
    }
}
