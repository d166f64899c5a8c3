//! Warehouse loader - lands schema-described JSON record batches in warehouse tables
//!
//! Provides:
//! - Schema flattening and type mapping for nested JSON schemas
//! - Target schema and table name resolution for streams
//! - Table reconciliation (schema evolution) with an optional catalog cache
//! - Load orchestration: synchronous MERGE/COPY or managed ingestion
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod load;
pub mod models;
pub mod naming;
pub mod schema;
pub mod staging;
pub mod stream;

// Re-export commonly used types
pub use config::{Grantees, LoadMethod, LoaderConfig, SchemaMappingEntry, StagingMode};
pub use database::{
    CatalogCache, CatalogSnapshot, ErrorClassifier, QueryResult, SessionOptions,
    SnowflakeErrorClassifier, SqlApiWarehouse, TableReconciler, Warehouse, WarehouseConnection,
    WarehouseErrorKind,
};
pub use error::{LoaderError, LoaderResult, WarehouseError};
pub use load::{IngestService, LoadOrchestrator, LoadReport, SnowpipeClient};
pub use models::{StagedBatch, StreamSchemaMessage, TableDescriptor, TableKind};
pub use naming::{StreamName, TableNameResolver};
pub use schema::{ColumnType, FlattenedRecord, FlattenedSchema, PropertySchema, TypeMapper};
pub use staging::{Stager, UploadClient};
pub use stream::StreamContext;
