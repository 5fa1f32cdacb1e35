//! Snowflake warehouse reached through its SQL API.

use etl_config::shared::{ColumnMatching, FileFormat, StageType, WarehouseConfig};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::types::LoadMode;
use crate::warehouse::{LoadSummary, OnError, StageLocation, Warehouse, WarehouseTarget};

mod client;
pub mod sql;

pub use client::{QueryResult, SnowflakeSqlClient, SqlExecutor};

/// Status of a file the copy skipped.
const LOAD_FAILED_STATUS: &str = "LOAD_FAILED";

/// Settings of a [`SnowflakeWarehouse`] taken from the warehouse configuration.
#[derive(Debug, Clone)]
pub struct SnowflakeSettings {
    pub database: String,
    pub schema: String,
    pub file_format: FileFormat,
    pub stage_type: StageType,
    pub storage_integration: Option<String>,
    pub column_matching: ColumnMatching,
    pub load_error_threshold: f64,
}

impl SnowflakeSettings {
    pub fn new(config: &WarehouseConfig, file_format: FileFormat) -> Self {
        Self {
            database: config.database.clone(),
            schema: config.schema.clone(),
            file_format,
            stage_type: config.stage_type,
            storage_integration: config.storage_integration.clone(),
            column_matching: config.match_by_column_name,
            load_error_threshold: config.load_error_threshold,
        }
    }
}

/// A [`Warehouse`] issuing Snowflake statements through a [`SqlExecutor`].
#[derive(Debug, Clone)]
pub struct SnowflakeWarehouse<E> {
    executor: E,
    settings: SnowflakeSettings,
}

impl<E> SnowflakeWarehouse<E>
where
    E: SqlExecutor + Sync,
{
    pub fn new(executor: E, settings: SnowflakeSettings) -> Self {
        Self { executor, settings }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn execute(&self, statement: &str) -> EtlResult<QueryResult> {
        self.executor.execute(statement).await
    }

    /// Sums the per-file rows of a `COPY INTO` result.
    ///
    /// A copy finding nothing new returns a single status row without a `file` column. Files
    /// skipped by the `ON_ERROR` policy are reported with the `LOAD_FAILED` status.
    fn summarize_copy(result: &QueryResult) -> LoadSummary {
        let mut summary = LoadSummary {
            rows_parsed: result.sum("rows_parsed"),
            rows_loaded: result.sum("rows_loaded"),
            errors_seen: result.sum("errors_seen"),
            ..LoadSummary::default()
        };

        for row in 0..result.rows.len() {
            if result.value(row, "file").is_none() {
                continue;
            }

            match result.value(row, "status") {
                Some(status) if status.eq_ignore_ascii_case(LOAD_FAILED_STATUS) => {
                    summary.files_rejected += 1
                }
                _ => summary.files_loaded += 1,
            }
        }

        summary
    }
}

impl<E> Warehouse for SnowflakeWarehouse<E>
where
    E: SqlExecutor + Sync,
{
    fn stage_type(&self) -> StageType {
        self.settings.stage_type
    }

    fn target(&self, table: &str) -> WarehouseTarget {
        WarehouseTarget::new(
            &self.settings.database,
            &self.settings.schema,
            table,
            self.settings.file_format,
        )
    }

    async fn setup_namespace(&self) -> EtlResult<()> {
        // Any table name works here, the namespace objects do not depend on it.
        let target = self.target("");

        self.execute(&sql::create_database(&target)).await?;
        self.execute(&sql::create_schema(&target)).await?;
        self.execute(&sql::create_file_format(&target, self.settings.file_format))
            .await?;

        info!(
            database = %target.database,
            schema = %target.schema,
            file_format = %target.file_format_name,
            "warehouse namespace is ready"
        );

        Ok(())
    }

    async fn create_stage(
        &self,
        target: &WarehouseTarget,
        location: &StageLocation,
    ) -> EtlResult<()> {
        let statement = sql::create_stage(
            target,
            location,
            self.settings.storage_integration.as_deref(),
        );
        self.execute(&statement).await?;

        Ok(())
    }

    async fn direct_transfer(
        &self,
        local_path: &Path,
        file_name: &str,
        target: &WarehouseTarget,
    ) -> EtlResult<()> {
        self.execute(&sql::put(local_path, target)).await?;
        info!(file = file_name, stage = %target.stage_name, "pushed file into stage");

        Ok(())
    }

    async fn create_table(&self, target: &WarehouseTarget) -> EtlResult<()> {
        self.execute(&sql::create_table(target)).await?;

        Ok(())
    }

    async fn load(&self, target: &WarehouseTarget, mode: LoadMode) -> EtlResult<LoadSummary> {
        if mode == LoadMode::Replace {
            self.execute(&sql::delete_from(target)).await?;
        }

        let on_error = OnError::for_threshold(self.settings.load_error_threshold);
        let result = self
            .execute(&sql::copy_into(
                target,
                self.settings.column_matching,
                on_error,
            ))
            .await?;

        let summary = Self::summarize_copy(&result);
        if summary.errors_seen > 0 {
            warn!(
                table = %target.table,
                errors_seen = summary.errors_seen,
                rows_parsed = summary.rows_parsed,
                files_rejected = summary.files_rejected,
                "load rejected some rows"
            );
        }
        summary.ensure_no_rejected_files(target)?;

        Ok(summary)
    }

    async fn create_view(&self, target: &WarehouseTarget, view_name: &str) -> EtlResult<()> {
        self.execute(&sql::create_view(target, view_name)).await?;

        Ok(())
    }

    async fn max_value(&self, target: &WarehouseTarget, column: &str) -> EtlResult<Option<String>> {
        let result = match self.execute(&sql::max_value(target, column)).await {
            Ok(result) => result,
            Err(err) if err.kind() == ErrorKind::DestinationObjectNotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .flatten())
    }
}
