//! SQL statement builders
//!
//! Pure functions rendering the DDL and DML the loader sends. Identifiers
//! arrive already quoted where the warehouse needs them quoted.

use crate::models::TableDescriptor;
use crate::schema::FlattenedSchema;

/// Row guard applied to catalog introspection
pub const INTROSPECTION_MAX_RECORDS: usize = 9999;

/// `SHOW SCHEMAS LIKE` lookup for one schema
pub fn show_schemas_like(schema_name: &str) -> String {
    format!("SHOW SCHEMAS LIKE '{}'", schema_name.to_uppercase())
}

pub fn create_schema(schema_name: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", schema_name)
}

pub fn grant_usage_on_schema(schema_name: &str, role: &str) -> String {
    format!("GRANT USAGE ON SCHEMA {} TO ROLE {}", schema_name, role)
}

pub fn grant_select_on_all_tables(schema_name: &str, role: &str) -> String {
    format!("GRANT SELECT ON ALL TABLES IN SCHEMA {} TO ROLE {}", schema_name, role)
}

/// Tables of a schema, as a two statement transaction
pub fn list_tables(dbname: &str, schema_name: &str) -> Vec<String> {
    vec![
        format!("SHOW TERSE TABLES IN SCHEMA {}.{}", dbname, schema_name),
        r#"SELECT "schema_name" AS schema_name, "name" AS table_name FROM TABLE(RESULT_SCAN(LAST_QUERY_ID()))"#
            .to_string(),
    ]
}

/// Columns of a schema with generic type names, as a two statement transaction
///
/// `SHOW COLUMNS` reports FIXED and REAL for numeric types; they are mapped
/// back to NUMBER and FLOAT.
pub fn list_columns(dbname: &str, schema_name: &str) -> Vec<String> {
    vec![
        format!("SHOW COLUMNS IN SCHEMA {}.{}", dbname, schema_name),
        concat!(
            r#"SELECT "schema_name" AS schema_name, "table_name" AS table_name, "column_name" AS column_name, "#,
            r#"CASE PARSE_JSON("data_type"):type::varchar WHEN 'FIXED' THEN 'NUMBER' WHEN 'REAL' THEN 'FLOAT' "#,
            r#"ELSE PARSE_JSON("data_type"):type::varchar END data_type "#,
            r#"FROM TABLE(RESULT_SCAN(LAST_QUERY_ID()))"#
        )
        .to_string(),
    ]
}

/// Create-table statement with an optional primary key constraint
pub fn create_table(table: &TableDescriptor) -> String {
    let mut clauses = table.column_definitions.clone();
    if !table.primary_key.is_empty() {
        clauses.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
    }

    format!(
        "CREATE {}TABLE IF NOT EXISTS {} ({}) data_retention_time_in_days = {}",
        if table.is_temporary() { "TEMP " } else { "" },
        table.qualified_name(),
        clauses.join(", "),
        table.retention_days()
    )
}

pub fn add_column(qualified_table: &str, definition: &str) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", qualified_table, definition)
}

/// Rename a column out of the way, keeping its data
///
/// `column` is the quoted identifier, `suffix` a timestamp like `20240101_1200`.
pub fn version_column(qualified_table: &str, column: &str, suffix: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO \"{}_{}\"",
        qualified_table,
        column,
        column.replace('"', ""),
        suffix
    )
}

pub fn delete_flagged_rows(qualified_table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE _sdc_deleted_at IS NOT NULL",
        qualified_table
    )
}

fn column_identifiers(columns: &FlattenedSchema) -> Vec<String> {
    columns.iter().map(|c| c.identifier()).collect()
}

fn select_with_transforms(columns: &FlattenedSchema) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| match column.transform {
            Some(transform) => format!(
                "{}(${}) {}",
                transform.sql_function(),
                i + 1,
                column.identifier()
            ),
            None => format!("${} {}", i + 1, column.identifier()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Upsert staged rows by key
///
/// # Arguments
///
/// * `table` - Target table, its `primary_key` drives the join
/// * `columns` - Flattened columns in staged file order
/// * `stage` - Stage name (external stage or table stage)
/// * `reference` - Staged file key
/// * `file_format` - Named file format
pub fn merge(
    table: &TableDescriptor,
    columns: &FlattenedSchema,
    stage: &str,
    reference: &str,
    file_format: &str,
) -> String {
    let names = column_identifiers(columns);

    let condition = table
        .primary_key
        .iter()
        .map(|k| format!("s.{} = t.{}", k, k))
        .collect::<Vec<_>>()
        .join(" AND ");

    let updates = names
        .iter()
        .map(|n| format!("{}=s.{}", n, n))
        .collect::<Vec<_>>()
        .join(", ");

    let values = names
        .iter()
        .map(|n| format!("s.{}", n))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "MERGE INTO {} t USING (SELECT {} FROM '@{}/{}' (FILE_FORMAT => '{}')) s ON {} \
         WHEN MATCHED THEN UPDATE SET {} \
         WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        table.qualified_name(),
        select_with_transforms(columns),
        stage,
        reference,
        file_format,
        condition,
        updates,
        names.join(", "),
        values
    )
}

/// Append staged rows
pub fn copy_into(
    table: &TableDescriptor,
    columns: &FlattenedSchema,
    stage: &str,
    reference: &str,
    file_format: &str,
) -> String {
    format!(
        "COPY INTO {} ({}) FROM '@{}/{}' FILE_FORMAT = (format_name='{}')",
        table.qualified_name(),
        column_identifiers(columns).join(", "),
        stage,
        reference,
        file_format
    )
}

/// Deterministic ingestion pipe name for a table
pub fn pipe_name(dbname: &str, table: &TableDescriptor) -> String {
    format!(
        "{}.{}_s3_pipe",
        dbname.replace('"', ""),
        table.qualified_name().replace('"', "")
    )
}

/// Create a pipe copying from the external stage into the table
pub fn create_pipe(
    pipe_name: &str,
    dbname: &str,
    table: &TableDescriptor,
    columns: &FlattenedSchema,
    stage: &str,
    file_format: &str,
) -> String {
    format!(
        "create pipe {pipe} as copy into {db}.{table} ({cols}) from @{db}.{stage} \
         file_format = (format_name = {db}.{format} );",
        pipe = pipe_name,
        db = dbname,
        table = table.qualified_name(),
        cols = column_identifiers(columns).join(", "),
        stage = stage,
        format = file_format
    )
}

pub fn drop_pipe(pipe_name: &str) -> String {
    format!("drop pipe if exists {};", pipe_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableKind;
    use crate::schema::{PropertySchema, flatten_schema};
    use serde_json::json;

    fn columns() -> FlattenedSchema {
        let schema: PropertySchema = serde_json::from_value(json!({"properties": {
            "id": {"type": ["integer"]},
            "payload": {"type": ["null", "object"]},
            "region": {"type": ["string"]}
        }}))
        .unwrap();
        flatten_schema(&schema, 0).unwrap()
    }

    fn table(keys: &[&str]) -> TableDescriptor {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        TableDescriptor::new("raw", "sales-orders", TableKind::Permanent, &columns(), &keys)
    }

    #[test]
    fn test_create_table_with_primary_key() {
        assert_eq!(
            create_table(&table(&["id", "region"])),
            "CREATE TABLE IF NOT EXISTS raw.\"ORDERS\" (\"ID\" number, \"PAYLOAD\" variant, \
             \"REGION\" text, PRIMARY KEY (\"ID\", \"REGION\")) data_retention_time_in_days = 1"
        );
    }

    #[test]
    fn test_create_temp_table_without_key() {
        let temp = TableDescriptor::new("raw", "orders", TableKind::Temporary, &columns(), &[]);
        let sql = create_table(&temp);
        assert!(sql.starts_with("CREATE TEMP TABLE IF NOT EXISTS raw.\"ORDERS_TEMP\""));
        assert!(!sql.contains("PRIMARY KEY"));
        assert!(sql.ends_with("data_retention_time_in_days = 0"));
    }

    #[test]
    fn test_merge_joins_on_all_keys() {
        let sql = merge(&table(&["id", "region"]), &columns(), "s.stage", "k/f.csv", "s.fmt");
        assert!(sql.starts_with("MERGE INTO raw.\"ORDERS\" t USING (SELECT $1 \"ID\", parse_json($2) \"PAYLOAD\", $3 \"REGION\" FROM '@s.stage/k/f.csv' (FILE_FORMAT => 's.fmt')) s"));
        assert!(sql.contains("ON s.\"ID\" = t.\"ID\" AND s.\"REGION\" = t.\"REGION\""));
        assert!(sql.contains("UPDATE SET \"ID\"=s.\"ID\", \"PAYLOAD\"=s.\"PAYLOAD\", \"REGION\"=s.\"REGION\""));
        assert!(sql.ends_with("INSERT (\"ID\", \"PAYLOAD\", \"REGION\") VALUES (s.\"ID\", s.\"PAYLOAD\", s.\"REGION\")"));
    }

    #[test]
    fn test_copy_into() {
        assert_eq!(
            copy_into(&table(&[]), &columns(), "raw.%\"ORDERS\"", "f.csv", "s.fmt"),
            "COPY INTO raw.\"ORDERS\" (\"ID\", \"PAYLOAD\", \"REGION\") FROM '@raw.%\"ORDERS\"/f.csv' \
             FILE_FORMAT = (format_name='s.fmt')"
        );
    }

    #[test]
    fn test_pipe_statements() {
        let t = table(&[]);
        let pipe = pipe_name("\"ANALYTICS\"", &t);
        assert_eq!(pipe, "ANALYTICS.raw.ORDERS_s3_pipe");
        assert_eq!(drop_pipe(&pipe), "drop pipe if exists ANALYTICS.raw.ORDERS_s3_pipe;");

        let create = create_pipe(&pipe, "ANALYTICS", &t, &columns(), "stg.landing", "stg.csv");
        assert_eq!(
            create,
            "create pipe ANALYTICS.raw.ORDERS_s3_pipe as copy into ANALYTICS.raw.\"ORDERS\" \
             (\"ID\", \"PAYLOAD\", \"REGION\") from @ANALYTICS.stg.landing \
             file_format = (format_name = ANALYTICS.stg.csv );"
        );
    }

    #[test]
    fn test_version_column() {
        assert_eq!(
            version_column("raw.\"ORDERS\"", "\"AMOUNT\"", "20240102_0304"),
            "ALTER TABLE raw.\"ORDERS\" RENAME COLUMN \"AMOUNT\" TO \"AMOUNT_20240102_0304\""
        );
    }
}
