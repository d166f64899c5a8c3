//! Tests for load orchestration: MERGE/COPY and managed ingestion

mod common;

use common::{
    RecordingSleeper, RecordingUploads, ScriptedIngest, ScriptedWarehouse, Submission, config,
    context, empty_report, events_message, loaded_report, merge_result, message, snowpipe_config,
};
use serde_json::json;
use std::sync::Arc;
use warehouse_loader::error::{LoaderError, WarehouseError};
use warehouse_loader::{LoadOrchestrator, QueryResult, StagedBatch, Stager};

const PIPE: &str = "ANALYTICS.raw.EVENTS_s3_pipe";

fn batch(reference: &str) -> StagedBatch {
    StagedBatch::new(reference, 2, 128, "app-events")
}

mod merge_and_copy {
    use super::*;

    #[test]
    fn test_merge_counts_inserts_then_updates() {
        let config = config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        warehouse
            .respond("MERGE INTO", merge_result(2, 0))
            .respond("MERGE INTO", merge_result(0, 2));
        let orchestrator = LoadOrchestrator::new(&config, &warehouse);

        let first = orchestrator.load(&ctx, &batch("batch.csv")).unwrap();
        assert_eq!((first.inserts, first.updates), (2, 0));
        assert_eq!(first.size_bytes, 128);

        let second = orchestrator.load(&ctx, &batch("batch.csv")).unwrap();
        assert_eq!((second.inserts, second.updates), (0, 2));

        let statement = &warehouse.executed()[0];
        assert!(statement.starts_with(
            "MERGE INTO raw.\"EVENTS\" t USING (SELECT $1 \"ID\", parse_json($2) \"PAYLOAD\" \
             FROM '@raw.%\"EVENTS\"/batch.csv' (FILE_FORMAT => 'staging.csv_format')) s \
             ON s.\"ID\" = t.\"ID\""
        ));
    }

    #[test]
    fn test_copy_without_key_properties() {
        let config = config();
        let ctx = context(
            &config,
            message(json!({
                "stream": "app-clicks",
                "schema": {"properties": {"url": {"type": ["string"]}}}
            })),
        );
        let warehouse = ScriptedWarehouse::new();
        warehouse.respond(
            "COPY INTO",
            QueryResult::new(vec![], vec![json!({"file": "batch.csv", "rows_loaded": 3})]),
        );

        let report = LoadOrchestrator::new(&config, &warehouse)
            .load(&ctx, &batch("batch.csv"))
            .unwrap();

        assert_eq!((report.inserts, report.updates), (3, 0));
        assert_eq!(
            warehouse.executed(),
            vec![
                "COPY INTO raw.\"CLICKS\" (\"URL\") FROM '@raw.%\"CLICKS\"/batch.csv' \
                 FILE_FORMAT = (format_name='staging.csv_format')"
            ]
        );
    }

    #[test]
    fn test_external_stage_used_when_configured() {
        let mut config = config();
        config.s3_bucket = Some("raw-landing".to_string());
        config.stage = Some("staging.landing_stage".to_string());
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();

        LoadOrchestrator::new(&config, &warehouse)
            .load(&ctx, &batch("loads/batch.csv"))
            .unwrap();

        assert!(warehouse.executed()[0].contains("FROM '@staging.landing_stage/loads/batch.csv'"));
    }

    #[test]
    fn test_merge_failure_is_fatal() {
        let config = config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        warehouse.fail(
            "MERGE INTO",
            WarehouseError::with_code("100038", "22018", "Numeric value 'abc' is not recognized"),
        );

        let err = LoadOrchestrator::new(&config, &warehouse)
            .load(&ctx, &batch("batch.csv"))
            .unwrap_err();
        assert!(matches!(err, LoaderError::Warehouse(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_delete_rows() {
        let config = config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        warehouse.respond(
            "DELETE FROM",
            QueryResult::new(vec![], vec![json!({"number of rows deleted": 4})]),
        );

        let deleted = LoadOrchestrator::new(&config, &warehouse)
            .delete_rows(&ctx)
            .unwrap();

        assert_eq!(deleted, 4);
        assert_eq!(
            warehouse.executed(),
            vec!["DELETE FROM raw.\"EVENTS\" WHERE _sdc_deleted_at IS NOT NULL"]
        );
    }
}

mod managed_ingestion {
    use super::*;

    fn orchestrator<'a>(
        config: &'a warehouse_loader::LoaderConfig,
        warehouse: &'a ScriptedWarehouse,
        ingest: &Arc<ScriptedIngest>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> LoadOrchestrator<'a> {
        LoadOrchestrator::new(config, warehouse)
            .with_ingest_service(ingest.clone())
            .with_sleeper(sleeper.clone())
    }

    #[test]
    fn test_retries_exhausted_after_max_attempts() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        let ingest = Arc::new(ScriptedIngest::new(
            (0..5)
                .map(|i| Submission::Transient(format!("HTTP 503: attempt {}", i)))
                .collect(),
            vec![],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("loads/raw__events/batch.csv"))
            .unwrap_err();

        match &err {
            LoaderError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(*attempts, 5);
                assert_eq!(last_error, "HTTP 503: attempt 4");
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(err.exit_code(), 1);
        assert_eq!(ingest.submit_calls(), 5);
        assert_eq!(sleeper.seconds(), vec![2, 4, 8, 32]);
        assert_eq!(*ingest.report_calls.lock().unwrap(), 0);
        assert_eq!(warehouse.count_prefix("drop pipe"), 0);
    }

    #[test]
    fn test_retry_budget_honours_max_retry() {
        let mut config = snowpipe_config();
        config.max_retry = 2;
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        let ingest = Arc::new(ScriptedIngest::new(
            vec![
                Submission::Transient("timeout".to_string()),
                Submission::Transient("timeout".to_string()),
                Submission::Accepted,
            ],
            vec![],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("batch.csv"))
            .unwrap_err();

        assert!(matches!(err, LoaderError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(ingest.submit_calls(), 2);
        assert_eq!(sleeper.seconds(), vec![2]);
    }

    #[test]
    fn test_submission_stops_on_success_and_polls_until_reported() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        let reference = "loads/raw__events/batch.csv";
        let ingest = Arc::new(ScriptedIngest::new(
            vec![
                Submission::Transient("HTTP 502".to_string()),
                Submission::Transient("HTTP 502".to_string()),
                Submission::Accepted,
            ],
            vec![
                empty_report(PIPE),
                empty_report(PIPE),
                loaded_report(PIPE, reference, 2),
            ],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());

        let report = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch(reference))
            .unwrap();

        assert_eq!(report.inserts, 2);
        assert_eq!(report.updates, 0);
        assert_eq!(report.rows_parsed, Some(2));
        assert_eq!(report.status.as_deref(), Some("LOADED"));

        assert_eq!(ingest.submit_calls(), 3);
        assert_eq!(ingest.submitted.lock().unwrap()[2][0].path, reference);
        assert_eq!(*ingest.report_calls.lock().unwrap(), 3);
        // two submission backoffs, then two growing poll waits
        assert_eq!(sleeper.seconds(), vec![2, 4, 30, 35]);

        assert_eq!(
            warehouse.executed(),
            vec![
                format!(
                    "create pipe {} as copy into ANALYTICS.raw.\"EVENTS\" (\"ID\", \"PAYLOAD\") \
                     from @ANALYTICS.staging.landing_stage \
                     file_format = (format_name = ANALYTICS.staging.csv_format );",
                    PIPE
                ),
                format!("drop pipe if exists {};", PIPE),
            ]
        );
    }

    #[test]
    fn test_rejected_submission_is_not_retried() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        let ingest = Arc::new(ScriptedIngest::new(
            vec![Submission::Rejected("HTTP 403: forbidden".to_string())],
            vec![],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("batch.csv"))
            .unwrap_err();

        assert!(matches!(err, LoaderError::Ingestion(_)));
        assert_eq!(ingest.submit_calls(), 1);
        assert!(sleeper.seconds().is_empty());
    }

    #[test]
    fn test_existing_pipe_tolerated_and_drop_failure_only_warns() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        warehouse
            .fail(
                "create pipe",
                WarehouseError::with_code(
                    "002002",
                    "42710",
                    "SQL compilation error:\nObject 'EVENTS_S3_PIPE' already exists.",
                ),
            )
            .fail(
                "drop pipe",
                WarehouseError::with_code("003001", "42501", "Insufficient privileges"),
            );
        let ingest = Arc::new(ScriptedIngest::new(
            vec![],
            vec![loaded_report(PIPE, "batch.csv", 2)],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());

        let report = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("batch.csv"))
            .unwrap();

        assert_eq!(report.inserts, 2);
        assert_eq!(warehouse.count_prefix("drop pipe"), 1);
    }

    #[test]
    fn test_pipe_creation_failure_aborts() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        warehouse.fail(
            "create pipe",
            WarehouseError::with_code("003001", "42501", "Insufficient privileges"),
        );
        let ingest = Arc::new(ScriptedIngest::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("batch.csv"))
            .unwrap_err();

        assert!(matches!(err, LoaderError::Warehouse(_)));
        assert_eq!(ingest.submit_calls(), 0);
    }

    #[test]
    fn test_managed_ingestion_requires_named_stage() {
        let mut config = config();
        config.load_via_snowpipe = true;
        let ctx = context(&config, events_message());
        let warehouse = ScriptedWarehouse::new();
        let ingest = Arc::new(ScriptedIngest::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = orchestrator(&config, &warehouse, &ingest, &sleeper)
            .load(&ctx, &batch("batch.csv"))
            .unwrap_err();

        assert!(matches!(err, LoaderError::Configuration(_)));
        assert!(warehouse.executed().is_empty());
    }
}

mod staging {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_staged_reference_flows_into_submission() {
        let config = snowpipe_config();
        let ctx = context(&config, events_message());

        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", ctx.record_to_csv_line(json!({"id": 1}).as_object().unwrap()))
            .unwrap();
        drop(file);

        let uploads = RecordingUploads::default();
        let stager = Stager::new(&uploads, &config);
        let staged = stager.put_to_stage(&ctx, &path, 1).unwrap();

        assert_eq!(staged.reference, "loads/raw__events/batch.csv");
        assert_eq!(staged.size_bytes, 3);
        assert_eq!(staged.row_count, 1);

        let warehouse = ScriptedWarehouse::new();
        let ingest = Arc::new(ScriptedIngest::new(
            vec![],
            vec![loaded_report(PIPE, &staged.reference, 1)],
        ));
        let report = LoadOrchestrator::new(&config, &warehouse)
            .with_ingest_service(ingest.clone())
            .with_sleeper(Arc::new(RecordingSleeper::default()))
            .load(&ctx, &staged)
            .unwrap();
        assert_eq!(report.inserts, 1);
        assert_eq!(ingest.submitted.lock().unwrap()[0][0].path, staged.reference);

        stager.delete_from_stage(&staged).unwrap();
        assert_eq!(
            *uploads.deletes.lock().unwrap(),
            vec!["loads/raw__events/batch.csv".to_string()]
        );
    }
}
