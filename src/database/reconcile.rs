//! Table reconciliation
//!
//! Brings the physical table in line with a stream's flattened schema:
//! absent tables are created, missing columns are added and columns whose
//! type changed are versioned (renamed aside) before the new column is
//! added. Column data is never migrated between versions.

use std::collections::HashMap;
use tracing::{debug, info};

use super::catalog::{CatalogCache, CatalogQueries, CatalogSnapshot};
use super::classify::ErrorClassifier;
use super::{Warehouse, query, sql};
use crate::error::LoaderResult;
use crate::schema::{ColumnType, FlattenedSchema};
use crate::stream::StreamContext;

/// Table state observed before reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Absent,
    MatchesSchema,
    /// Columns missing or type-mismatched
    Divergent,
}

/// Column-level differences between the flattened schema and a live table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileChanges {
    /// Column definitions to add, in schema order
    pub added: Vec<String>,
    /// Quoted identifiers of columns to version, paired with their new definition
    pub versioned: Vec<(String, String)>,
    /// Columns left alone although their live type differs
    ///
    /// A date-time column never replaces an existing column of another type.
    pub narrowing_skipped: Vec<String>,
}

impl ReconcileChanges {
    /// Whether any DDL is required
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.versioned.is_empty()
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// State found before any DDL
    pub state: TableState,
    pub changes: ReconcileChanges,
    /// Cache to use for the next pass, refreshed when anything changed
    pub cache: CatalogCache,
}

/// Issues the DDL that makes a table match its stream
pub struct TableReconciler<'a> {
    warehouse: &'a dyn Warehouse,
    classifier: &'a dyn ErrorClassifier,
    dbname: &'a str,
}

impl<'a> TableReconciler<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        classifier: &'a dyn ErrorClassifier,
        dbname: &'a str,
    ) -> Self {
        Self {
            warehouse,
            classifier,
            dbname,
        }
    }

    /// Compute the column diff against live column types
    ///
    /// `live` maps upper-cased column names to their catalog type names.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use warehouse_loader::database::TableReconciler;
    /// use warehouse_loader::schema::{PropertySchema, flatten_schema};
    ///
    /// let schema: PropertySchema = serde_json::from_str(
    ///     r#"{"properties": {"id": {"type": "integer"}, "name": {"type": "string"}}}"#,
    /// ).unwrap();
    /// let columns = flatten_schema(&schema, 0).unwrap();
    /// let live = HashMap::from([("ID".to_string(), "NUMBER".to_string())]);
    ///
    /// let changes = TableReconciler::diff(&columns, &live);
    /// assert_eq!(changes.added, vec!["\"NAME\" text"]);
    /// ```
    pub fn diff(columns: &FlattenedSchema, live: &HashMap<String, String>) -> ReconcileChanges {
        let mut changes = ReconcileChanges::default();

        for column in columns.iter() {
            match live.get(&column.warehouse_name()) {
                None => changes.added.push(column.definition()),
                Some(live_type) if column.column_type.matches_catalog_type(live_type) => {}
                Some(_) if column.column_type == ColumnType::TimestampNtz => {
                    changes.narrowing_skipped.push(column.identifier());
                }
                Some(_) => changes
                    .versioned
                    .push((column.identifier(), column.definition())),
            }
        }

        changes
    }

    fn catalog<'c>(&'c self, ctx: &'c StreamContext) -> CatalogQueries<'c> {
        CatalogQueries::new(self.warehouse, ctx.session(), self.dbname, self.classifier)
    }

    fn execute(&self, ctx: &StreamContext, statement: String) -> LoaderResult<()> {
        query(self.warehouse, ctx.session(), statement, 0)?;
        Ok(())
    }

    fn refresh(&self, ctx: &StreamContext) -> LoaderResult<CatalogSnapshot> {
        self.catalog(ctx)
            .get_table_columns(std::slice::from_ref(&ctx.target().schema_name))
    }

    fn grant(
        &self,
        ctx: &StreamContext,
        render: fn(&str, &str) -> String,
    ) -> LoaderResult<()> {
        let Some(grantees) = &ctx.target().grantees else {
            return Ok(());
        };

        for role in grantees.roles() {
            let statement = render(&ctx.target().schema_name, role);
            info!("Granting privilege to '{}'... {}", role, statement);
            self.execute(ctx, statement)?;
        }
        Ok(())
    }

    /// Create the stream's target schema when it does not exist yet
    ///
    /// Grants `USAGE` on a new schema to the configured grantees.
    pub fn create_schema_if_not_exists(
        &self,
        ctx: &StreamContext,
        cache: CatalogCache,
    ) -> LoaderResult<CatalogCache> {
        let schema_name = &ctx.target().schema_name;

        let exists = match &cache {
            Some(snapshot) => snapshot.has_schema(schema_name),
            None => self.catalog(ctx).schema_exists(schema_name)?,
        };

        if exists {
            return Ok(cache);
        }

        let statement = sql::create_schema(schema_name);
        info!("Schema '{}' does not exist. Creating... {}", schema_name, statement);
        self.execute(ctx, statement)?;
        self.grant(ctx, sql::grant_usage_on_schema)?;

        match cache {
            Some(_) => Ok(Some(self.refresh(ctx)?)),
            None => Ok(None),
        }
    }

    /// Converge the stream's table to its flattened schema
    pub fn sync_table(
        &self,
        ctx: &StreamContext,
        cache: CatalogCache,
    ) -> LoaderResult<ReconcileOutcome> {
        let table = ctx.table();

        let exists = match &cache {
            Some(snapshot) => snapshot.has_table(table),
            None => self
                .catalog(ctx)
                .get_tables(&[ctx.target().schema_name.to_uppercase()])?
                .iter()
                .any(|row| row.table_name.eq_ignore_ascii_case(&table.table_name)),
        };

        if !exists {
            info!("Table '{}' does not exist. Creating...", table.qualified_name());
            self.execute(ctx, sql::create_table(table))?;
            self.grant(ctx, sql::grant_select_on_all_tables)?;

            let cache = match cache {
                Some(_) => Some(self.refresh(ctx)?),
                None => None,
            };

            return Ok(ReconcileOutcome {
                state: TableState::Absent,
                changes: ReconcileChanges {
                    added: table.column_definitions.clone(),
                    ..Default::default()
                },
                cache,
            });
        }

        info!("Table '{}' exists", table.qualified_name());
        self.update_columns(ctx, cache)
    }

    fn update_columns(
        &self,
        ctx: &StreamContext,
        cache: CatalogCache,
    ) -> LoaderResult<ReconcileOutcome> {
        let table = ctx.table();
        let qualified = table.qualified_name();

        let live = match &cache {
            Some(snapshot) => snapshot.columns_of(table),
            None => self.refresh(ctx)?.columns_of(table),
        };

        let changes = Self::diff(ctx.columns(), &live);

        for identifier in &changes.narrowing_skipped {
            debug!(
                "Keeping existing type of {} on '{}', new type is a date-time",
                identifier, qualified
            );
        }

        for definition in &changes.added {
            let statement = sql::add_column(&qualified, definition);
            info!("Adding column: {}", statement);
            self.execute(ctx, statement)?;
        }

        let suffix = chrono::Utc::now().format("%Y%m%d_%H%M").to_string();
        for (identifier, definition) in &changes.versioned {
            let statement = sql::version_column(&qualified, identifier, &suffix);
            info!("Versioning column: {}", statement);
            self.execute(ctx, statement)?;

            let statement = sql::add_column(&qualified, definition);
            info!("Adding column: {}", statement);
            self.execute(ctx, statement)?;
        }

        let state = if changes.is_empty() {
            TableState::MatchesSchema
        } else {
            TableState::Divergent
        };

        let cache = match cache {
            Some(_) if !changes.is_empty() => Some(self.refresh(ctx)?),
            other => other,
        };

        Ok(ReconcileOutcome {
            state,
            changes,
            cache,
        })
    }
}
