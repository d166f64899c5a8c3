//! Managed ingestion REST interface
//!
//! [`IngestService`] is the seam the orchestrator drives; [`SnowpipeClient`]
//! implements it against the Snowpipe `insertFiles` / `insertReport`
//! endpoints using key-pair tokens.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::auth::KeyPairAuth;
use crate::error::{LoaderError, LoaderResult};

/// File submitted for ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFileRef {
    /// Path relative to the pipe's stage
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl StagedFileRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }
}

/// Acknowledgement of a file submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertFilesResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub response_code: String,
}

/// Ingestion status of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestedFile {
    pub path: String,
    pub stage_location: Option<String>,
    pub file_size: Option<u64>,
    pub rows_inserted: u64,
    pub rows_parsed: u64,
    pub errors_seen: u64,
    pub complete: bool,
    pub status: String,
}

/// Ingestion history of a pipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestReport {
    pub pipe: String,
    pub complete_result: bool,
    pub next_begin_mark: Option<String>,
    pub files: Vec<IngestedFile>,
}

impl IngestReport {
    /// History entry for a submitted path
    pub fn find(&self, path: &str) -> Option<&IngestedFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Submits staged files to a pipe and reports their ingestion
///
/// Network failures and retryable HTTP statuses surface as
/// [`LoaderError::TransientIngestion`].
pub trait IngestService: Send + Sync {
    fn insert_files(&self, pipe: &str, files: &[StagedFileRef])
    -> LoaderResult<InsertFilesResponse>;

    fn insert_report(&self, pipe: &str) -> LoaderResult<IngestReport>;
}

/// Whether an HTTP status is worth retrying
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Snowpipe REST client
pub struct SnowpipeClient {
    client: Client,
    base_url: String,
    auth: KeyPairAuth,
}

impl SnowpipeClient {
    /// Client for `https://<account>.snowflakecomputing.com`
    pub fn new(account: &str, auth: KeyPairAuth) -> LoaderResult<Self> {
        Self::with_base_url(format!("https://{}.snowflakecomputing.com", account), auth)
    }

    pub fn with_base_url(base_url: impl Into<String>, auth: KeyPairAuth) -> LoaderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LoaderError::TransientIngestion(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Endpoint URL for a pipe operation
    pub fn endpoint(&self, pipe: &str, operation: &str) -> String {
        format!(
            "{}/v1/data/pipes/{}/{}?requestId={}",
            self.base_url,
            urlencoding::encode(pipe),
            operation,
            Uuid::new_v4()
        )
    }

    fn check(response: Response) -> LoaderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let message = format!("HTTP {}: {}", status, body);
        if is_transient_status(status) {
            Err(LoaderError::TransientIngestion(message))
        } else {
            Err(LoaderError::Ingestion(message))
        }
    }
}

fn network_error(e: reqwest::Error) -> LoaderError {
    LoaderError::TransientIngestion(e.to_string())
}

impl IngestService for SnowpipeClient {
    fn insert_files(
        &self,
        pipe: &str,
        files: &[StagedFileRef],
    ) -> LoaderResult<InsertFilesResponse> {
        let url = self.endpoint(pipe, "insertFiles");
        debug!("Submitting {} file(s) to {}", files.len(), pipe);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.auth.token()?)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "files": files }))
            .send()
            .map_err(network_error)?;

        let body: InsertFilesResponse = Self::check(response)?.json().map_err(network_error)?;
        if body.response_code != "SUCCESS" {
            return Err(LoaderError::Ingestion(format!(
                "Unexpected response code: {}",
                body.response_code
            )));
        }
        Ok(body)
    }

    fn insert_report(&self, pipe: &str) -> LoaderResult<IngestReport> {
        let url = self.endpoint(pipe, "insertReport");

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.auth.token()?)
            .header("Accept", "application/json")
            .send()
            .map_err(network_error)?;

        Self::check(response)?.json().map_err(network_error)
    }
}
