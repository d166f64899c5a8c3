//! Loader configuration
//!
//! Handles parsing of TOML or JSON configuration files, environment
//! variable overrides and up-front validation. Validation runs before any
//! connection is opened so that a broken configuration never reaches the
//! warehouse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{LoaderError, LoaderResult};

/// Default location of the signing key used for key-pair authentication
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "/rsa_key.p8";

/// Default number of submission attempts for managed ingestion
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Environment variable for the account identifier
pub const ENV_ACCOUNT: &str = "WAREHOUSE_LOADER_ACCOUNT";

/// Environment variable for the user name
pub const ENV_USER: &str = "WAREHOUSE_LOADER_USER";

/// Environment variable for the signing key path
pub const ENV_PRIVATE_KEY_PATH: &str = "WAREHOUSE_LOADER_PRIVATE_KEY_PATH";

/// Environment variable for the signing key password
pub const ENV_PRIVATE_KEY_PASSWORD: &str = "WAREHOUSE_LOADER_PRIVATE_KEY_PASSWORD";

/// Roles that receive read privileges on created schemas and tables
///
/// Accepts either a single role or a list of roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grantees {
    /// A single role
    One(String),
    /// Several roles, each receiving the same privilege
    Many(Vec<String>),
}

impl Grantees {
    /// Iterate over the roles
    pub fn roles(&self) -> Vec<&str> {
        match self {
            Grantees::One(role) => vec![role.as_str()],
            Grantees::Many(roles) => roles.iter().map(String::as_str).collect(),
        }
    }
}

/// Per-stream schema mapping entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMappingEntry {
    /// Target schema for streams whose source schema matches the mapping key
    #[serde(default)]
    pub target_schema: Option<String>,
    /// Roles to grant read privileges to, overriding the default grantees
    #[serde(default)]
    pub target_schema_select_permissions: Option<Grantees>,
}

/// How staged files reach the warehouse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingMode {
    /// Object storage bucket exposed as a named external stage
    External { bucket: String, stage: String },
    /// Warehouse-managed table stage
    TableStage,
}

/// Which load strategy the orchestrator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMethod {
    /// Synchronous transactional MERGE or COPY
    #[default]
    Merge,
    /// Asynchronous managed ingestion through a pipe
    Snowpipe,
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from(DEFAULT_PRIVATE_KEY_PATH)
}

fn default_max_retry() -> u32 {
    DEFAULT_MAX_RETRY
}

fn default_retry_max_delay_secs() -> u64 {
    3600
}

fn default_poll_initial_delay_secs() -> u64 {
    30
}

fn default_poll_increment_secs() -> u64 {
    5
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Account identifier (e.g. "xy12345.eu-west-1")
    #[serde(default)]
    pub account: String,
    /// Target database name
    #[serde(default)]
    pub dbname: String,
    /// User name
    #[serde(default)]
    pub user: String,
    /// Compute warehouse name
    #[serde(default)]
    pub warehouse: String,
    /// Optional role for the session
    #[serde(default)]
    pub role: Option<String>,

    /// Object storage bucket for external staging
    #[serde(default)]
    pub s3_bucket: Option<String>,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub s3_key_prefix: Option<String>,
    /// Named external stage in `<schema>.<stage_name>` form
    #[serde(default)]
    pub stage: Option<String>,
    /// Named file format used by bulk load statements
    #[serde(default)]
    pub file_format: String,

    /// Target schema for streams without an explicit mapping
    #[serde(default)]
    pub default_target_schema: Option<String>,
    /// Roles to grant read privileges to when no mapping overrides them
    #[serde(default)]
    pub default_target_schema_select_permissions: Option<Grantees>,
    /// Per source-schema mapping
    #[serde(default)]
    pub schema_mapping: Option<HashMap<String, SchemaMappingEntry>>,

    /// How deep nested objects are flattened into columns
    #[serde(default)]
    pub data_flattening_max_level: usize,

    /// Use managed ingestion instead of MERGE/COPY
    #[serde(default)]
    pub load_via_snowpipe: bool,
    /// Submission attempts before managed ingestion gives up
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Upper bound for a single submission backoff wait
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    /// First wait while polling ingestion history
    #[serde(default = "default_poll_initial_delay_secs")]
    pub poll_initial_delay_secs: u64,
    /// Amount every subsequent poll wait grows by
    #[serde(default = "default_poll_increment_secs")]
    pub poll_increment_secs: u64,

    /// PKCS#8 PEM signing key
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    /// Password protecting the signing key
    #[serde(default)]
    pub private_key_password: Option<String>,

    /// Query tag pattern supporting `{schema}` and `{table}` tokens
    #[serde(default)]
    pub query_tag: Option<String>,
    /// Delete rows flagged with `_sdc_deleted_at` after each load
    #[serde(default)]
    pub hard_delete: bool,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

impl LoaderConfig {
    /// Load configuration from a file
    ///
    /// `.json` files are parsed as JSON, everything else as TOML.
    /// Environment variable overrides are applied afterwards.
    pub fn load(path: &Path) -> LoaderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::io(path, e))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let mut config = if is_json {
            Self::parse_json(&content)?
        } else {
            Self::parse(&content)?
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> LoaderResult<Self> {
        toml::from_str(content)
            .map_err(|e| LoaderError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from JSON string
    pub fn parse_json(content: &str) -> LoaderResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| LoaderError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> LoaderResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LoaderError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(account) = lookup(ENV_ACCOUNT) {
            self.account = account;
        }

        if let Some(user) = lookup(ENV_USER) {
            self.user = user;
        }

        if let Some(path) = lookup(ENV_PRIVATE_KEY_PATH) {
            self.private_key_path = PathBuf::from(path);
        }

        if let Some(password) = lookup(ENV_PRIVATE_KEY_PASSWORD) {
            self.private_key_password = Some(password);
        }
    }

    /// Staging mode derived from `s3_bucket` and `stage`
    ///
    /// Returns `None` when only one of the two is set.
    pub fn staging_mode(&self) -> Option<StagingMode> {
        match (&self.s3_bucket, &self.stage) {
            (Some(bucket), Some(stage)) if !bucket.is_empty() && !stage.is_empty() => {
                Some(StagingMode::External {
                    bucket: bucket.clone(),
                    stage: stage.clone(),
                })
            }
            (bucket, stage) if is_blank(bucket) && is_blank(stage) => Some(StagingMode::TableStage),
            _ => None,
        }
    }

    /// Selected load strategy
    pub fn load_method(&self) -> LoadMethod {
        if self.load_via_snowpipe {
            LoadMethod::Snowpipe
        } else {
            LoadMethod::Merge
        }
    }

    /// Collect every configuration problem
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut required: Vec<(&str, bool)> = vec![
            ("account", self.account.is_empty()),
            ("dbname", self.dbname.is_empty()),
            ("user", self.user.is_empty()),
            ("warehouse", self.warehouse.is_empty()),
            ("file_format", self.file_format.is_empty()),
        ];

        match self.staging_mode() {
            Some(StagingMode::External { stage, .. }) => {
                required.push(("s3_bucket", false));
                required.push(("stage", false));

                let parts: Vec<&str> = stage.split('.').collect();
                if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
                    errors.push(
                        "The named external stage object in config has to use the \
                         <schema>.<stage_name> format."
                            .to_string(),
                    );
                }
            }
            Some(StagingMode::TableStage) => {
                if self.load_via_snowpipe {
                    errors.push(
                        "Loading via snowpipe requires both 's3_bucket' and 'stage' keys."
                            .to_string(),
                    );
                }
            }
            None => errors.push(
                "Only one of 's3_bucket' or 'stage' keys defined in config. \
                 Use both of them if you want to use an external stage when loading data \
                 or don't use any of them if you want to use table stages."
                    .to_string(),
            ),
        }

        for (key, missing) in required {
            if missing {
                errors.push(format!("Required key is missing from config: [{}]", key));
            }
        }

        let has_mapping = self.schema_mapping.as_ref().is_some_and(|m| !m.is_empty());
        if is_blank(&self.default_target_schema) && !has_mapping {
            errors.push(
                "Neither 'default_target_schema' (string) nor 'schema_mapping' (object) \
                 keys set in config."
                    .to_string(),
            );
        }

        errors
    }

    /// Validate the configuration, failing with every problem at once
    pub fn validate(&self) -> LoaderResult<()> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoaderError::Configuration(errors.join("; ")))
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Warehouse loader configuration

account = "xy12345.eu-west-1"
dbname = "ANALYTICS"
user = "LOADER"
warehouse = "LOAD_WH"
# role = "LOADER_ROLE"

# Named file format used by MERGE / COPY statements
file_format = "staging.csv_format"

# External staging: set both or neither (table stages)
s3_bucket = "raw-landing"
s3_key_prefix = "loads/"
stage = "staging.landing_stage"

default_target_schema = "raw"
default_target_schema_select_permissions = ["reporting"]

# Nested objects deeper than this are loaded as semi-structured columns
data_flattening_max_level = 0

# Managed ingestion instead of MERGE / COPY
load_via_snowpipe = false
max_retry = 5
poll_initial_delay_secs = 30
poll_increment_secs = 5

private_key_path = "/rsa_key.p8"
# private_key_password = "..."

query_tag = "loader {schema}.{table}"

[schema_mapping.sales]
target_schema = "sales_raw"
target_schema_select_permissions = "sales_reader"
"#
}
