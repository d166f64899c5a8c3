//! Staging collaborator contract
//!
//! The loader never uploads files itself. An [`UploadClient`] (object storage
//! or a warehouse-managed stage) stages batch files and deletes them again;
//! this module only derives where files go and which stage loads read from.

use std::path::Path;
use tracing::info;

use crate::config::{LoadMethod, LoaderConfig};
use crate::error::{LoaderError, LoaderResult};
use crate::models::{StagedBatch, TableDescriptor};
use crate::stream::StreamContext;

/// Stages batch files for loading
pub trait UploadClient: Send + Sync {
    /// Upload a local file under `key_prefix`, returning the staged reference
    fn upload_file(&self, file: &Path, stream: &str, key_prefix: &str) -> LoaderResult<String>;

    /// Delete a previously staged reference
    fn delete_object(&self, stream: &str, reference: &str) -> LoaderResult<()>;
}

/// Object key prefix for a stream's staged files
///
/// Managed ingestion watches one folder per table, so `<schema>__<table>/`
/// is appended in that mode.
pub fn key_prefix(
    configured_prefix: Option<&str>,
    table: &TableDescriptor,
    method: LoadMethod,
) -> String {
    let mut prefix = String::new();

    let base = configured_prefix.unwrap_or_default().replace('/', "");
    if !base.is_empty() {
        prefix.push_str(&base);
        prefix.push('/');
    }

    if method == LoadMethod::Snowpipe {
        let folder = table
            .qualified_name()
            .to_lowercase()
            .replace('"', "")
            .replace('.', "__");
        prefix.push_str(&folder);
        prefix.push('/');
    }

    prefix
}

/// Stage that loads read from: the named external stage or the table stage
pub fn stage_name(config: &LoaderConfig, table: &TableDescriptor) -> String {
    match config.stage.as_deref() {
        Some(stage) if !stage.is_empty() => stage.to_string(),
        _ => format!("{}.%{}", table.schema_name, table.quoted_name()),
    }
}

/// Uploads and removes staged batches for the configured target
pub struct Stager<'a> {
    client: &'a dyn UploadClient,
    config: &'a LoaderConfig,
}

impl<'a> Stager<'a> {
    pub fn new(client: &'a dyn UploadClient, config: &'a LoaderConfig) -> Self {
        Self { client, config }
    }

    /// Stage a local batch file holding `row_count` rows
    pub fn put_to_stage(
        &self,
        ctx: &StreamContext,
        file: &Path,
        row_count: usize,
    ) -> LoaderResult<StagedBatch> {
        info!("Uploading {} rows to stage", row_count);

        let size_bytes = std::fs::metadata(file)
            .map_err(|e| LoaderError::io(file, e))?
            .len();
        let prefix = key_prefix(
            self.config.s3_key_prefix.as_deref(),
            ctx.table(),
            self.config.load_method(),
        );
        let reference = self.client.upload_file(file, ctx.stream(), &prefix)?;

        Ok(StagedBatch::new(reference, row_count, size_bytes, ctx.stream()))
    }

    pub fn delete_from_stage(&self, batch: &StagedBatch) -> LoaderResult<()> {
        info!("Deleting {} from stage", batch.reference);
        self.client.delete_object(&batch.stream, &batch.reference)
    }
}
