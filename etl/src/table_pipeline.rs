//! The per-table replication task.

use chrono::{DateTime, Utc};
use etl_config::shared::StageType;
use futures::StreamExt;
use std::path::Path;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::metrics::{
    ETL_FILES_TRANSFERRED_TOTAL, ETL_ROWS_EXTRACTED_TOTAL, ETL_ROWS_SKIPPED_TOTAL,
    ETL_TABLE_DURATION_SECONDS, ETL_TABLE_TASKS_TOTAL, ETL_TRANSFER_FAILURES_TOTAL,
    OBJECT_STORAGE, STATUS, TABLE, TRANSFER, WAREHOUSE_STAGE,
};
use crate::source::{ExtractionBatch, ExtractionQuery, SourceReader};
use crate::stager::{LocalStager, StagedFile, TableLayout, staged_file_name};
use crate::transfer::{DatePartition, ObjectTransfer, RemoteLayout};
use crate::types::{ColumnSchema, TableReplication, TableRunStats, TaskResult};
use crate::warehouse::{StageLocation, Warehouse, WarehouseTarget};

/// Options shared by every table of a replication.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Source database name, the first level of the staging tree.
    pub database: String,
    /// Source schema holding the replicated tables.
    pub schema: String,
    /// Deletes a local file once at least one transfer of it succeeded.
    pub delete_after_transfer: bool,
    /// Transfers every file of the table directory instead of only the files of this run.
    pub upload_remaining_files: bool,
}

impl PipelineSettings {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            delete_after_transfer: true,
            upload_remaining_files: true,
        }
    }
}

/// Object storage receiving the staged files.
#[derive(Debug, Clone)]
pub struct ObjectStorage<T> {
    pub transfer: T,
    pub layout: RemoteLayout,
    /// Appends a `year=/month=/day=` segment, computed once per table run, to object keys.
    pub date_partitioning: bool,
}

/// Replicates one table at a time: extraction, local staging, transfer and warehouse load.
///
/// Failures never escape [`TablePipeline::run`], they are turned into a failed [`TaskResult`].
#[derive(Debug)]
pub struct TablePipeline<R, T, W> {
    source: R,
    stager: LocalStager,
    object_storage: Option<ObjectStorage<T>>,
    warehouse: Option<W>,
    settings: PipelineSettings,
}

impl<R, T, W> TablePipeline<R, T, W>
where
    R: SourceReader + Sync,
    T: ObjectTransfer + Sync,
    W: Warehouse + Sync,
{
    pub fn new(
        source: R,
        stager: LocalStager,
        object_storage: Option<ObjectStorage<T>>,
        warehouse: Option<W>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            stager,
            object_storage,
            warehouse,
            settings,
        }
    }

    pub fn warehouse(&self) -> Option<&W> {
        self.warehouse.as_ref()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// `<schema>.<source table>`, the name a table is reported under.
    pub fn table_identity(&self, table: &TableReplication) -> String {
        format!("{}.{}", self.settings.schema, table.source_table)
    }

    /// Local directory of the staged files of `table`.
    pub fn table_directory(&self, table: &TableReplication) -> std::path::PathBuf {
        self.stager.table_directory(&self.layout(table))
    }

    pub async fn run(&self, table: &TableReplication) -> TaskResult {
        self.run_at(table, Utc::now()).await
    }

    /// Runs the table with `started_at` as the timestamp of its files and date partition.
    pub async fn run_at(&self, table: &TableReplication, started_at: DateTime<Utc>) -> TaskResult {
        let table_identity = self.table_identity(table);
        let span = info_span!("table_pipeline", table = %table_identity);
        let start = Instant::now();

        let mut stats = TableRunStats::default();
        let result = self
            .replicate(table, &table_identity, started_at, &mut stats)
            .instrument(span)
            .await;

        let result = match result {
            Ok(()) => {
                info!(
                    table = %table_identity,
                    rows_extracted = stats.rows_extracted,
                    rows_skipped = stats.rows_skipped,
                    files_written = stats.files_written,
                    files_transferred = stats.files_transferred,
                    files_retained = stats.files_retained,
                    files_not_deleted = stats.files_not_deleted,
                    rows_loaded = stats.rows_loaded,
                    "table replication completed"
                );
                TaskResult::completed(&table_identity, stats)
            }
            Err(err) => {
                error!(table = %table_identity, error = %err, "table replication failed");
                TaskResult::failed(&table_identity, err, stats)
            }
        };

        metrics::counter!(
            ETL_TABLE_TASKS_TOTAL,
            TABLE => table_identity.clone(),
            STATUS => result.status.to_string()
        )
        .increment(1);
        metrics::histogram!(ETL_TABLE_DURATION_SECONDS, TABLE => table_identity)
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn replicate(
        &self,
        table: &TableReplication,
        table_identity: &str,
        started_at: DateTime<Utc>,
        stats: &mut TableRunStats,
    ) -> EtlResult<()> {
        if table.source_table.trim().is_empty() || table.target_table_name.trim().is_empty() {
            bail!(ErrorKind::ValidationError, "Table name is empty");
        }
        if !table.replicate {
            bail!(
                ErrorKind::InvalidState,
                "Table is not enabled for replication",
                table_identity
            );
        }

        let query = ExtractionQuery::new(&self.settings.schema, &table.source_table)
            .with_fields(table.selected_fields.clone())
            .with_filter(table.filter_clause.clone());
        debug!(query = %query, "extracting table");

        let layout = self.layout(table);
        let directory = self.stager.table_directory(&layout);

        let written = match table.batch_size {
            None => {
                self.extract_bulk(table, table_identity, &query, &directory, started_at, stats)
                    .await?
            }
            Some(batch_size) => {
                self.extract_batched(
                    table,
                    table_identity,
                    &query,
                    batch_size,
                    &directory,
                    started_at,
                    stats,
                )
                .await?
            }
        };

        let Some(written) = written else {
            info!("source returned no rows, nothing to replicate");
            return Ok(());
        };

        let target = match &self.warehouse {
            Some(warehouse) => {
                let target = warehouse.target(&table.target_table_name);
                let location = self.stage_location(warehouse, &layout)?;
                warehouse.create_stage(&target, &location).await?;
                Some(target)
            }
            None => None,
        };

        self.sweep_pending_files(
            &layout,
            &written,
            started_at,
            target.as_ref(),
            table_identity,
            stats,
        )
        .await?;

        let (Some(warehouse), Some(target)) = (&self.warehouse, &target) else {
            return Ok(());
        };

        if stats.files_transferred == 0 {
            warn!(
                files_retained = stats.files_retained,
                "no file reached the warehouse, skipping the load"
            );
            return Ok(());
        }

        warehouse.create_table(target).await?;
        let summary = warehouse.load(target, table.load_mode).await?;
        stats.rows_loaded = summary.rows_loaded;
        info!(
            warehouse_table = %target.table,
            load_mode = %table.load_mode,
            files = summary.files_loaded,
            rows = summary.rows_loaded,
            "loaded table"
        );

        if let Some(view_name) = &table.view_name {
            warehouse.create_view(target, view_name).await?;
            debug!(view = %view_name, "created view");
        }

        Ok(())
    }

    /// Extracts the whole table into a single file. Returns `None` when there are no rows.
    async fn extract_bulk(
        &self,
        table: &TableReplication,
        table_identity: &str,
        query: &ExtractionQuery,
        directory: &Path,
        started_at: DateTime<Utc>,
        stats: &mut TableRunStats,
    ) -> EtlResult<Option<Vec<StagedFile>>> {
        let batch = self.source.execute(query).await?;
        Self::record_extraction(table_identity, &batch, stats);

        if batch.is_empty() {
            return Ok(None);
        }

        let columns = self.resolve_columns(table, &batch.columns).await?;
        let file = self
            .write_batch(&batch, &columns, None, directory, table_identity, started_at, stats)
            .await?;

        Ok(Some(vec![file]))
    }

    /// Extracts the table in batches of `batch_size` rows, one file per batch.
    ///
    /// Returns `None` when the source counts no rows. Batches left empty by undecodable rows are
    /// not written.
    #[allow(clippy::too_many_arguments)]
    async fn extract_batched(
        &self,
        table: &TableReplication,
        table_identity: &str,
        query: &ExtractionQuery,
        batch_size: usize,
        directory: &Path,
        started_at: DateTime<Utc>,
        stats: &mut TableRunStats,
    ) -> EtlResult<Option<Vec<StagedFile>>> {
        let total_rows = self.source.count_rows(query).await?;
        if total_rows == 0 {
            return Ok(None);
        }
        info!(total_rows, batch_size, "extracting table in batches");

        let mut batches = self.source.execute_batched(query, batch_size).await?;
        let mut columns: Option<Vec<ColumnSchema>> = None;
        let mut written = Vec::new();

        while let Some(batch) = batches.next().await {
            let batch = batch?;
            Self::record_extraction(table_identity, &batch, stats);

            if batch.is_empty() {
                warn!(
                    batch = batch.sequence_index,
                    skipped_rows = batch.skipped_rows,
                    "every row of the batch was skipped"
                );
                continue;
            }

            if columns.is_none() {
                columns = Some(self.resolve_columns(table, &batch.columns).await?);
            }

            let file = self
                .write_batch(
                    &batch,
                    columns.as_deref().unwrap_or_default(),
                    Some(batch.sequence_index),
                    directory,
                    table_identity,
                    started_at,
                    stats,
                )
                .await?;
            written.push(file);
        }

        Ok(Some(written))
    }

    fn record_extraction(table_identity: &str, batch: &ExtractionBatch, stats: &mut TableRunStats) {
        let rows = batch.rows.len() as u64;
        stats.rows_extracted += rows;
        stats.rows_skipped += batch.skipped_rows;

        metrics::counter!(ETL_ROWS_EXTRACTED_TOTAL, TABLE => table_identity.to_string())
            .increment(rows);
        if batch.skipped_rows > 0 {
            warn!(
                batch = batch.sequence_index,
                skipped_rows = batch.skipped_rows,
                "skipped undecodable rows"
            );
            metrics::counter!(ETL_ROWS_SKIPPED_TOTAL, TABLE => table_identity.to_string())
                .increment(batch.skipped_rows);
        }
    }

    /// Output columns of `table`: the selected fields when given, otherwise the table columns.
    ///
    /// The names and their order come from the table configuration or the source catalog and must
    /// match the extracted columns, which carry the types.
    async fn resolve_columns(
        &self,
        table: &TableReplication,
        extracted: &[ColumnSchema],
    ) -> EtlResult<Vec<ColumnSchema>> {
        let names = if table.selected_fields.is_empty() {
            self.source
                .list_columns(&self.settings.schema, &table.source_table)
                .await?
        } else {
            table.selected_fields.clone()
        };

        let matches = names.len() == extracted.len()
            && names
                .iter()
                .zip(extracted)
                .all(|(name, column)| *name == column.name);
        if !matches {
            bail!(
                ErrorKind::SourceSchemaError,
                "Extracted columns do not match the table columns",
                format!(
                    "expected [{}], extracted [{}]",
                    names.join(", "),
                    extracted
                        .iter()
                        .map(|column| column.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            );
        }

        Ok(extracted.to_vec())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_batch(
        &self,
        batch: &ExtractionBatch,
        columns: &[ColumnSchema],
        batch_index: Option<usize>,
        directory: &Path,
        table_identity: &str,
        started_at: DateTime<Utc>,
        stats: &mut TableRunStats,
    ) -> EtlResult<StagedFile> {
        let rows = &batch.rows;
        let file_name = staged_file_name(started_at, batch_index, self.stager.format());
        let local_path = directory.join(&file_name);
        self.stager.write(&local_path, rows, columns).await?;
        stats.files_written += 1;

        info!(file = %file_name, rows = rows.len(), "staged file");

        Ok(StagedFile {
            local_path,
            remote_path: None,
            table_identity: table_identity.to_string(),
            created_at: started_at,
            rows: rows.len(),
        })
    }

    fn stage_location(&self, warehouse: &W, layout: &TableLayout) -> EtlResult<StageLocation> {
        match warehouse.stage_type() {
            StageType::Internal => Ok(StageLocation::Internal),
            StageType::External => {
                let Some(object_storage) = &self.object_storage else {
                    bail!(
                        ErrorKind::ConfigError,
                        "An external stage needs object storage"
                    );
                };

                let directory = object_storage.layout.table_directory(layout);
                Ok(StageLocation::External {
                    url: object_storage.transfer.location_url(&directory),
                })
            }
        }
    }

    /// Transfers the pending files of a table and removes the transferred ones.
    ///
    /// Pending files are every file of the table directory, including files retained by earlier
    /// runs whose transfers failed, or only `written` when leftovers are not uploaded. A file is
    /// pushed to the internal warehouse stage first, then uploaded to object storage. It is deleted
    /// once at least one of those succeeded and retained otherwise. A failed delete is logged and
    /// counted without stopping the sweep.
    pub async fn sweep_pending_files(
        &self,
        layout: &TableLayout,
        written: &[StagedFile],
        started_at: DateTime<Utc>,
        target: Option<&WarehouseTarget>,
        table_identity: &str,
        stats: &mut TableRunStats,
    ) -> EtlResult<()> {
        let direct_target = match (&self.warehouse, target) {
            (Some(warehouse), Some(target)) if warehouse.stage_type() == StageType::Internal => {
                Some((warehouse, target))
            }
            _ => None,
        };

        if direct_target.is_none() && self.object_storage.is_none() {
            debug!("no transfer destination, staged files stay local");
            return Ok(());
        }

        let directory = self.stager.table_directory(layout);
        let pending = if self.settings.upload_remaining_files {
            self.stager.list_files(&directory).await?
        } else {
            written
                .iter()
                .filter_map(|file| file.file_name().map(str::to_string))
                .collect()
        };

        let partition = self
            .object_storage
            .as_ref()
            .filter(|object_storage| object_storage.date_partitioning)
            .map(|_| DatePartition::from_timestamp(started_at));

        for file_name in pending {
            let local_path = directory.join(&file_name);
            let mut transferred = false;

            if let Some((warehouse, target)) = direct_target {
                match warehouse
                    .direct_transfer(&local_path, &file_name, target)
                    .await
                {
                    Ok(()) => {
                        transferred = true;
                        Self::record_transfer(table_identity, WAREHOUSE_STAGE);
                    }
                    Err(err) => {
                        warn!(file = %file_name, error = %err, "direct transfer to the warehouse failed");
                        Self::record_transfer_failure(table_identity, WAREHOUSE_STAGE);
                    }
                }
            }

            if let Some(object_storage) = &self.object_storage {
                let remote_path =
                    object_storage
                        .layout
                        .object_path(layout, partition.as_ref(), &file_name);
                match object_storage
                    .transfer
                    .upload(&local_path, &remote_path)
                    .await
                {
                    Ok(()) => {
                        transferred = true;
                        Self::record_transfer(table_identity, OBJECT_STORAGE);
                        debug!(file = %file_name, remote_path = %remote_path, "uploaded file");
                    }
                    Err(err) => {
                        warn!(file = %file_name, error = %err, "upload to object storage failed");
                        Self::record_transfer_failure(table_identity, OBJECT_STORAGE);
                    }
                }
            }

            if !transferred {
                stats.files_retained += 1;
                warn!(file = %file_name, "file retained for the next run");
                continue;
            }

            stats.files_transferred += 1;
            if self.settings.delete_after_transfer
                && let Err(err) = self.stager.delete(&local_path).await
            {
                stats.files_not_deleted += 1;
                warn!(file = %file_name, error = %err, "failed to delete transferred file");
            }
        }

        Ok(())
    }

    fn record_transfer(table_identity: &str, transfer: &'static str) {
        metrics::counter!(
            ETL_FILES_TRANSFERRED_TOTAL,
            TABLE => table_identity.to_string(),
            TRANSFER => transfer
        )
        .increment(1);
    }

    fn record_transfer_failure(table_identity: &str, transfer: &'static str) {
        metrics::counter!(
            ETL_TRANSFER_FAILURES_TOTAL,
            TABLE => table_identity.to_string(),
            TRANSFER => transfer
        )
        .increment(1);
    }

    fn layout(&self, table: &TableReplication) -> TableLayout {
        TableLayout::new(
            &self.settings.database,
            &self.settings.schema,
            &table.target_table_name,
        )
    }
}
