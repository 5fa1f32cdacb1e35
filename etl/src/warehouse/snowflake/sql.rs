//! Statements issued against Snowflake.

use etl_config::shared::{ColumnMatching, FileFormat};
use std::path::Path;

use crate::stager::CSV_DELIMITER;
use crate::warehouse::{OnError, StageLocation, WarehouseTarget, quote_identifier};

fn on_error_sql(on_error: OnError) -> String {
    match on_error {
        OnError::AbortStatement => "ABORT_STATEMENT".to_string(),
        OnError::SkipFilePercent(percent) => format!("'SKIP_FILE_{percent}%'"),
    }
}

fn column_matching_sql(matching: ColumnMatching) -> &'static str {
    match matching {
        ColumnMatching::CaseInsensitive => "CASE_INSENSITIVE",
        ColumnMatching::CaseSensitive => "CASE_SENSITIVE",
    }
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub fn create_database(target: &WarehouseTarget) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS {}",
        quote_identifier(&target.database)
    )
}

pub fn create_schema(target: &WarehouseTarget) -> String {
    format!(
        "CREATE SCHEMA IF NOT EXISTS {}.{}",
        quote_identifier(&target.database),
        quote_identifier(&target.schema)
    )
}

pub fn create_file_format(target: &WarehouseTarget, format: FileFormat) -> String {
    let options = match format {
        FileFormat::Parquet => "TYPE = PARQUET".to_string(),
        FileFormat::Csv => format!(
            "TYPE = CSV FIELD_DELIMITER = '{}' PARSE_HEADER = TRUE ERROR_ON_COLUMN_COUNT_MISMATCH = FALSE",
            CSV_DELIMITER as char
        ),
    };

    format!(
        "CREATE FILE FORMAT IF NOT EXISTS {} {options}",
        target.qualified_file_format()
    )
}

pub fn create_stage(
    target: &WarehouseTarget,
    location: &StageLocation,
    storage_integration: Option<&str>,
) -> String {
    match location {
        StageLocation::Internal => format!(
            "CREATE STAGE IF NOT EXISTS {} FILE_FORMAT = {}",
            target.qualified_stage(),
            target.qualified_file_format()
        ),
        StageLocation::External { url } => {
            let integration = storage_integration
                .map(|integration| format!(" STORAGE_INTEGRATION = {}", quote_identifier(integration)))
                .unwrap_or_default();

            format!(
                "CREATE STAGE IF NOT EXISTS {}{integration} URL = {} FILE_FORMAT = {}",
                target.qualified_stage(),
                quote_literal(url),
                target.qualified_file_format()
            )
        }
    }
}

pub fn put(local_path: &Path, target: &WarehouseTarget) -> String {
    format!(
        "PUT {} @{} AUTO_COMPRESS = FALSE OVERWRITE = TRUE",
        quote_literal(&format!("file://{}", local_path.display())),
        target.qualified_stage()
    )
}

pub fn create_table(target: &WarehouseTarget) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} USING TEMPLATE (\
         SELECT ARRAY_AGG(OBJECT_CONSTRUCT(*)) FROM TABLE(INFER_SCHEMA(\
         LOCATION => {}, FILE_FORMAT => {}))) ENABLE_SCHEMA_EVOLUTION = TRUE",
        target.qualified_table(),
        quote_literal(&format!("@{}", target.qualified_stage())),
        quote_literal(&target.qualified_file_format())
    )
}

pub fn delete_from(target: &WarehouseTarget) -> String {
    format!("DELETE FROM {}", target.qualified_table())
}

pub fn copy_into(target: &WarehouseTarget, matching: ColumnMatching, on_error: OnError) -> String {
    format!(
        "COPY INTO {} FROM @{} FILE_FORMAT = (FORMAT_NAME = {}) MATCH_BY_COLUMN_NAME = {} ON_ERROR = {}",
        target.qualified_table(),
        target.qualified_stage(),
        quote_literal(&target.qualified_file_format()),
        column_matching_sql(matching),
        on_error_sql(on_error)
    )
}

pub fn create_view(target: &WarehouseTarget, view_name: &str) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
        target.qualified_view(view_name),
        target.qualified_table()
    )
}

/// Columns keep the case of the staged files, so the name is quoted as given.
pub fn max_value(target: &WarehouseTarget, column: &str) -> String {
    format!(
        "SELECT MAX({})::VARCHAR FROM {}",
        quote_identifier(column),
        target.qualified_table()
    )
}
