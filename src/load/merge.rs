//! Synchronous MERGE / COPY strategy

use tracing::info;

use super::{LoadOrchestrator, LoadReport};
use crate::database::{query, sql};
use crate::error::LoaderResult;
use crate::models::StagedBatch;
use crate::staging::stage_name;
use crate::stream::StreamContext;

impl LoadOrchestrator<'_> {
    /// Upsert by key when the stream declares key properties, append otherwise
    pub(super) fn load_merge(
        &self,
        ctx: &StreamContext,
        batch: &StagedBatch,
    ) -> LoaderResult<LoadReport> {
        let table = ctx.table();
        let stage = stage_name(self.config, table);
        let file_format = &self.config.file_format;

        let mut report = LoadReport {
            size_bytes: batch.size_bytes,
            ..Default::default()
        };

        if ctx.message().has_key_properties() {
            let statement = sql::merge(table, ctx.columns(), &stage, &batch.reference, file_format);
            let result = query(self.warehouse, ctx.session(), statement, 0)?;
            report.inserts = result.first_row_count("number of rows inserted");
            report.updates = result.first_row_count("number of rows updated");
        } else {
            let statement =
                sql::copy_into(table, ctx.columns(), &stage, &batch.reference, file_format);
            let result = query(self.warehouse, ctx.session(), statement, 0)?;
            report.inserts = result.first_row_count("rows_loaded");
        }

        info!(
            "Loading into {}: {{\"inserts\": {}, \"updates\": {}, \"size_bytes\": {}}}",
            table.qualified_name(),
            report.inserts,
            report.updates,
            report.size_bytes
        );
        Ok(report)
    }
}
