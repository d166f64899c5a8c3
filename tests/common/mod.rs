//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use warehouse_loader::database::{
    QueryResult, SessionOptions, Warehouse, WarehouseConnection,
};
use warehouse_loader::error::{LoaderError, LoaderResult, WarehouseError};
use warehouse_loader::load::{
    IngestReport, IngestService, IngestedFile, InsertFilesResponse, Sleeper, StagedFileRef,
};
use warehouse_loader::staging::UploadClient;
use warehouse_loader::{LoaderConfig, StreamContext, StreamSchemaMessage};

pub const TABLES_SELECT: &str = r#"SELECT "schema_name" AS schema_name, "name""#;
pub const COLUMNS_SELECT: &str = r#"SELECT "schema_name" AS schema_name, "table_name""#;

type Scripted = Result<QueryResult, WarehouseError>;

/// Warehouse answering statements by prefix
///
/// Each prefix holds a queue of answers; the last one repeats. Unscripted
/// statements succeed with an empty result.
#[derive(Default)]
pub struct ScriptedWarehouse {
    executed: Mutex<Vec<String>>,
    sessions: Mutex<Vec<SessionOptions>>,
    script: Mutex<Vec<(String, VecDeque<Scripted>)>>,
}

impl ScriptedWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &str, answer: Scripted) {
        let mut script = self.script.lock().unwrap();
        match script.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, answers)) => answers.push_back(answer),
            None => script.push((prefix.to_string(), VecDeque::from([answer]))),
        }
    }

    pub fn respond(&self, prefix: &str, result: QueryResult) -> &Self {
        self.push(prefix, Ok(result));
        self
    }

    pub fn fail(&self, prefix: &str, error: WarehouseError) -> &Self {
        self.push(prefix, Err(error));
        self
    }

    /// Script table listings with `(schema, table)` rows
    pub fn tables(&self, rows: &[(&str, &str)]) -> &Self {
        let rows = rows
            .iter()
            .map(|(s, t)| json!({"SCHEMA_NAME": s, "TABLE_NAME": t}))
            .collect();
        self.respond(TABLES_SELECT, QueryResult::new(vec![], rows))
    }

    /// Script column listings with `(schema, table, column, type)` rows
    pub fn columns(&self, rows: &[(&str, &str, &str, &str)]) -> &Self {
        let rows = rows
            .iter()
            .map(|(s, t, c, d)| {
                json!({"SCHEMA_NAME": s, "TABLE_NAME": t, "COLUMN_NAME": c, "DATA_TYPE": d})
            })
            .collect();
        self.respond(COLUMNS_SELECT, QueryResult::new(vec![], rows))
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Executed statements excluding transaction control and introspection
    pub fn ddl(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|sql| {
                !(sql == "START TRANSACTION"
                    || sql == "COMMIT"
                    || sql.starts_with("SHOW ")
                    || sql.starts_with("SELECT "))
            })
            .collect()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.executed()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    pub fn sessions(&self) -> Vec<SessionOptions> {
        self.sessions.lock().unwrap().clone()
    }

    fn answer(&self, sql: &str) -> Scripted {
        let mut script = self.script.lock().unwrap();
        let Some((_, answers)) = script.iter_mut().find(|(p, _)| sql.starts_with(p.as_str()))
        else {
            return Ok(QueryResult::empty());
        };

        if answers.len() > 1 {
            answers.pop_front().unwrap_or_else(|| Ok(QueryResult::empty()))
        } else {
            answers.front().cloned().unwrap_or_else(|| Ok(QueryResult::empty()))
        }
    }
}

struct ScriptedConnection<'a> {
    warehouse: &'a ScriptedWarehouse,
}

impl WarehouseConnection for ScriptedConnection<'_> {
    fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        self.warehouse.executed.lock().unwrap().push(sql.to_string());
        self.warehouse.answer(sql)
    }
}

impl Warehouse for ScriptedWarehouse {
    fn open_connection(
        &self,
        session: &SessionOptions,
    ) -> LoaderResult<Box<dyn WarehouseConnection + '_>> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(Box::new(ScriptedConnection { warehouse: self }))
    }
}

/// Upload client recording staged files under a fixed object key
#[derive(Default)]
pub struct RecordingUploads {
    pub uploads: Mutex<Vec<(String, String)>>,
    pub deletes: Mutex<Vec<String>>,
}

impl UploadClient for RecordingUploads {
    fn upload_file(&self, file: &Path, stream: &str, key_prefix: &str) -> LoaderResult<String> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("batch.csv");
        let reference = format!("{}{}", key_prefix, name);
        self.uploads
            .lock()
            .unwrap()
            .push((stream.to_string(), reference.clone()));
        Ok(reference)
    }

    fn delete_object(&self, _stream: &str, reference: &str) -> LoaderResult<()> {
        self.deletes.lock().unwrap().push(reference.to_string());
        Ok(())
    }
}

/// Scripted outcome of one file submission
#[derive(Debug, Clone)]
pub enum Submission {
    Accepted,
    Transient(String),
    Rejected(String),
}

/// Ingestion service replaying scripted submissions and reports
#[derive(Default)]
pub struct ScriptedIngest {
    submissions: Mutex<VecDeque<Submission>>,
    reports: Mutex<VecDeque<IngestReport>>,
    pub submitted: Mutex<Vec<Vec<StagedFileRef>>>,
    pub report_calls: Mutex<usize>,
}

impl ScriptedIngest {
    pub fn new(submissions: Vec<Submission>, reports: Vec<IngestReport>) -> Self {
        Self {
            submissions: Mutex::new(submissions.into()),
            reports: Mutex::new(reports.into()),
            ..Default::default()
        }
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

impl IngestService for ScriptedIngest {
    fn insert_files(
        &self,
        _pipe: &str,
        files: &[StagedFileRef],
    ) -> LoaderResult<InsertFilesResponse> {
        self.submitted.lock().unwrap().push(files.to_vec());
        let next = self
            .submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Submission::Accepted);

        match next {
            Submission::Accepted => Ok(InsertFilesResponse {
                request_id: "req-1".to_string(),
                response_code: "SUCCESS".to_string(),
            }),
            Submission::Transient(message) => Err(LoaderError::TransientIngestion(message)),
            Submission::Rejected(message) => Err(LoaderError::Ingestion(message)),
        }
    }

    fn insert_report(&self, pipe: &str) -> LoaderResult<IngestReport> {
        *self.report_calls.lock().unwrap() += 1;
        Ok(self
            .reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| empty_report(pipe)))
    }
}

pub fn empty_report(pipe: &str) -> IngestReport {
    IngestReport {
        pipe: pipe.to_string(),
        ..Default::default()
    }
}

pub fn loaded_report(pipe: &str, path: &str, rows: u64) -> IngestReport {
    IngestReport {
        pipe: pipe.to_string(),
        complete_result: true,
        next_begin_mark: None,
        files: vec![IngestedFile {
            path: path.to_string(),
            rows_inserted: rows,
            rows_parsed: rows,
            complete: true,
            status: "LOADED".to_string(),
            ..Default::default()
        }],
    }
}

/// Sleeper recording requested waits without blocking
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn seconds(&self) -> Vec<u64> {
        self.sleeps.lock().unwrap().iter().map(|d| d.as_secs()).collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Minimal valid configuration targeting schema `raw` through table stages
pub fn config() -> LoaderConfig {
    LoaderConfig {
        account: "xy12345.eu-west-1".to_string(),
        dbname: "ANALYTICS".to_string(),
        user: "LOADER".to_string(),
        warehouse: "LOAD_WH".to_string(),
        file_format: "staging.csv_format".to_string(),
        default_target_schema: Some("raw".to_string()),
        max_retry: 5,
        retry_max_delay_secs: 3600,
        poll_initial_delay_secs: 30,
        poll_increment_secs: 5,
        ..Default::default()
    }
}

/// Configuration loading through an external stage with managed ingestion
pub fn snowpipe_config() -> LoaderConfig {
    LoaderConfig {
        s3_bucket: Some("raw-landing".to_string()),
        s3_key_prefix: Some("loads".to_string()),
        stage: Some("staging.landing_stage".to_string()),
        load_via_snowpipe: true,
        ..config()
    }
}

pub fn message(value: Value) -> StreamSchemaMessage {
    serde_json::from_value(value).unwrap()
}

/// Stream `app-events` with an integer key and one nested object
pub fn events_message() -> StreamSchemaMessage {
    message(json!({
        "stream": "app-events",
        "schema": {"properties": {
            "id": {"type": ["integer"]},
            "payload": {"type": ["object"], "properties": {"x": {"type": ["string"]}}}
        }},
        "key_properties": ["id"]
    }))
}

pub fn context(config: &LoaderConfig, message: StreamSchemaMessage) -> StreamContext {
    StreamContext::new(config, message).unwrap()
}

/// Single-row MERGE result
pub fn merge_result(inserted: u64, updated: u64) -> QueryResult {
    QueryResult::new(
        vec![
            "number of rows inserted".to_string(),
            "number of rows updated".to_string(),
        ],
        vec![json!({"number of rows inserted": inserted, "number of rows updated": updated})],
    )
}
