//! Warehouse implementation over the Snowflake SQL API (v2)
//!
//! Each connection is a lightweight handle; every statement (or statement
//! list) is one blocking HTTP request authenticated with a key-pair token.
//! Statement lists are sent as a single multi-statement request so they
//! share one session and transaction.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{QueryResult, SessionOptions, Warehouse, WarehouseConnection};
use crate::auth::KeyPairAuth;
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult, WarehouseError};

/// Statement timeout sent with every request, in seconds
pub const STATEMENT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RowType {
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResultSetMetaData {
    num_rows: u64,
    row_type: Vec<RowType>,
    partition_info: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatementResponse {
    code: Option<String>,
    sql_state: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    statement_handles: Option<Vec<String>>,
    result_set_meta_data: Option<ResultSetMetaData>,
    data: Vec<Vec<Option<String>>>,
}

impl StatementResponse {
    fn error(&self) -> WarehouseError {
        WarehouseError {
            code: self.code.clone(),
            sql_state: self.sql_state.clone(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| "Statement failed".to_string()),
        }
    }

    fn column_names(&self) -> Vec<String> {
        self.result_set_meta_data
            .as_ref()
            .map(|m| m.row_type.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    fn partition_count(&self) -> usize {
        self.result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(0)
    }
}

/// Convert positional string cells into JSON objects keyed by column name
fn rows_to_objects(columns: &[String], data: Vec<Vec<Option<String>>>) -> Vec<Value> {
    data.into_iter()
        .map(|row| {
            let object: Map<String, Value> = columns
                .iter()
                .zip(row)
                .map(|(name, cell)| (name.clone(), cell.map(Value::String).unwrap_or(Value::Null)))
                .collect();
            Value::Object(object)
        })
        .collect()
}

/// Warehouse reached through the SQL API
pub struct SqlApiWarehouse {
    client: Client,
    base_url: String,
    auth: KeyPairAuth,
    database: String,
    warehouse: String,
    role: Option<String>,
    poll_interval: Duration,
}

impl SqlApiWarehouse {
    pub fn new(
        base_url: impl Into<String>,
        auth: KeyPairAuth,
        database: impl Into<String>,
        warehouse: impl Into<String>,
        role: Option<String>,
    ) -> LoaderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 60))
            .build()
            .map_err(|e| LoaderError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            database: database.into(),
            warehouse: warehouse.into(),
            role,
            poll_interval: Duration::from_millis(500),
        })
    }

    /// Connect using the account, key and warehouse settings of `config`
    pub fn from_config(config: &LoaderConfig) -> LoaderResult<Self> {
        let auth = KeyPairAuth::load(
            &config.account,
            &config.user,
            &config.private_key_path,
            config.private_key_password.as_deref(),
        )?;

        Self::new(
            format!("https://{}.snowflakecomputing.com", config.account),
            auth,
            config.dbname.clone(),
            config.warehouse.clone(),
            config.role.clone(),
        )
    }

    /// Request body for a statement (or `;`-joined statement list)
    fn request_body(&self, statement: &str, count: usize, session: &SessionOptions) -> Value {
        let mut parameters = Map::new();
        for (name, value) in session.parameters() {
            parameters.insert(name.to_string(), Value::String(value));
        }
        if count > 1 {
            parameters.insert(
                "MULTI_STATEMENT_COUNT".to_string(),
                Value::String(count.to_string()),
            );
        }

        let mut body = json!({
            "statement": statement,
            "timeout": STATEMENT_TIMEOUT_SECS,
            "database": self.database,
            "warehouse": self.warehouse,
            "parameters": parameters,
        });
        if let Some(role) = &self.role {
            body["role"] = Value::String(role.clone());
        }
        body
    }

    fn send(&self, request: RequestBuilder) -> Result<StatementResponse, WarehouseError> {
        let token = self
            .auth
            .token()
            .map_err(|e| WarehouseError::new(e.to_string()))?;

        let response = request
            .bearer_auth(token)
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header("Accept", "application/json")
            .send()
            .map_err(|e| WarehouseError::new(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body: StatementResponse = response
            .json()
            .map_err(|e| WarehouseError::new(format!("Invalid response ({}): {}", status, e)))?;

        match status {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(body),
            _ => Err(body.error()),
        }
    }

    fn statement_url(&self, handle: &str) -> String {
        format!("{}/api/v2/statements/{}", self.base_url, handle)
    }

    /// Submit statements and wait until the request finished
    fn submit(
        &self,
        statement: &str,
        count: usize,
        session: &SessionOptions,
    ) -> Result<StatementResponse, WarehouseError> {
        let url = format!(
            "{}/api/v2/statements?requestId={}",
            self.base_url,
            Uuid::new_v4()
        );
        let body = self.request_body(statement, count, session);
        let mut response = self.send(self.client.post(&url).json(&body))?;

        while response.result_set_meta_data.is_none() && response.statement_handles.is_none() {
            let Some(handle) = response.statement_handle.clone() else {
                return Err(response.error());
            };
            std::thread::sleep(self.poll_interval);
            response = self.send(self.client.get(self.statement_url(&handle)))?;
        }
        Ok(response)
    }

    /// Full result of a finished statement, all partitions included
    fn collect(&self, mut response: StatementResponse) -> Result<QueryResult, WarehouseError> {
        let columns = response.column_names();
        let mut data = std::mem::take(&mut response.data);

        if let Some(handle) = response.statement_handle.clone() {
            for partition in 1..response.partition_count() {
                let url = format!("{}?partition={}", self.statement_url(&handle), partition);
                let mut page = self.send(self.client.get(&url))?;
                data.append(&mut page.data);
            }
        }

        let mut result = QueryResult::new(columns.clone(), rows_to_objects(&columns, data));
        result.rows_affected = response.result_set_meta_data.as_ref().map(|m| m.num_rows);
        Ok(result)
    }

    fn fetch(&self, handle: &str) -> Result<QueryResult, WarehouseError> {
        let response = self.send(self.client.get(self.statement_url(handle)))?;
        self.collect(response)
    }
}

struct SqlApiConnection<'a> {
    warehouse: &'a SqlApiWarehouse,
    session: SessionOptions,
}

impl WarehouseConnection for SqlApiConnection<'_> {
    fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let response = self.warehouse.submit(sql, 1, &self.session)?;
        self.warehouse.collect(response)
    }

    fn execute_all(&mut self, statements: &[String]) -> Result<Vec<QueryResult>, WarehouseError> {
        if statements.len() <= 1 {
            return statements.iter().map(|sql| self.execute(sql)).collect();
        }

        let joined = statements.join(";\n");
        let response = self
            .warehouse
            .submit(&joined, statements.len(), &self.session)?;

        let handles = response.statement_handles.clone().unwrap_or_default();
        debug!("Multi-statement request returned {} handles", handles.len());
        handles.iter().map(|h| self.warehouse.fetch(h)).collect()
    }
}

impl Warehouse for SqlApiWarehouse {
    fn open_connection(
        &self,
        session: &SessionOptions,
    ) -> LoaderResult<Box<dyn WarehouseConnection + '_>> {
        Ok(Box::new(SqlApiConnection {
            warehouse: self,
            session: session.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_to_objects() {
        let columns = vec!["SCHEMA_NAME".to_string(), "TABLE_NAME".to_string()];
        let rows = rows_to_objects(&columns, vec![vec![Some("RAW".to_string()), None]]);
        assert_eq!(rows, vec![json!({"SCHEMA_NAME": "RAW", "TABLE_NAME": null})]);
    }

    #[test]
    fn test_parse_error_response() {
        let response: StatementResponse = serde_json::from_str(
            r#"{"code": "002003", "sqlState": "02000",
                "message": "SQL compilation error:\nSchema 'DB.RAW' does not exist or not authorized.",
                "statementHandle": "01a-b"}"#,
        )
        .unwrap();
        let err = response.error();
        assert_eq!(err.code.as_deref(), Some("002003"));
        assert_eq!(err.sql_state.as_deref(), Some("02000"));
    }

    #[test]
    fn test_parse_result_metadata() {
        let response: StatementResponse = serde_json::from_str(
            r#"{"resultSetMetaData": {"numRows": 2,
                    "rowType": [{"name": "number of rows inserted"}, {"name": "number of rows updated"}],
                    "partitionInfo": [{"rowCount": 2}]},
                "data": [["3", "1"]],
                "statementHandle": "01a-c"}"#,
        )
        .unwrap();
        assert_eq!(
            response.column_names(),
            vec!["number of rows inserted", "number of rows updated"]
        );
        assert_eq!(response.partition_count(), 1);

        let rows = rows_to_objects(&response.column_names(), response.data.clone());
        let result = QueryResult::new(response.column_names(), rows);
        assert_eq!(result.first_row_count("number of rows inserted"), 3);
    }
}
