use bytes::Bytes;
use csv::ReaderBuilder;
use etl_config::shared::{FileFormat, StageType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::stager::CSV_DELIMITER;
use crate::test_utils::MemoryObjectTransfer;
use crate::types::LoadMode;
use crate::warehouse::{LoadSummary, OnError, StageLocation, Warehouse, WarehouseTarget};

#[derive(Debug)]
struct MemoryStage {
    location: StageLocation,
    /// Files pushed with a direct transfer, by file name.
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    row_count: u64,
    /// Staged files already loaded into the table.
    load_history: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    namespace_setups: usize,
    stages: HashMap<String, MemoryStage>,
    tables: HashMap<String, MemoryTable>,
    views: HashMap<String, String>,
    max_values: HashMap<(String, String), String>,
    failing_tables: HashSet<String>,
    /// Rows the load rejects, by staged file name.
    rejected_rows: HashMap<String, u64>,
    calls: Vec<String>,
}

/// A [`Warehouse`] keeping its stages and tables in memory.
///
/// Loads read the staged CSV and Parquet files to count their rows and track loaded files per
/// table, so the difference between deleting rows and truncating a table can be observed. External
/// stages read the objects of a shared [`MemoryObjectTransfer`].
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    database: String,
    schema: String,
    file_format: FileFormat,
    stage_type: StageType,
    object_storage: Option<MemoryObjectTransfer>,
    load_error_threshold: f64,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    /// Creates a warehouse whose stages receive files through direct transfers.
    pub fn internal(database: &str, schema: &str, file_format: FileFormat) -> Self {
        Self::new(database, schema, file_format, StageType::Internal, None)
    }

    /// Creates a warehouse whose stages read the objects uploaded to `object_storage`.
    pub fn external(
        database: &str,
        schema: &str,
        file_format: FileFormat,
        object_storage: MemoryObjectTransfer,
    ) -> Self {
        Self::new(
            database,
            schema,
            file_format,
            StageType::External,
            Some(object_storage),
        )
    }

    fn new(
        database: &str,
        schema: &str,
        file_format: FileFormat,
        stage_type: StageType,
        object_storage: Option<MemoryObjectTransfer>,
    ) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
            file_format,
            stage_type,
            object_storage,
            load_error_threshold: 0.0,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Tolerates rejected rows the way a warehouse configured with `load_error_threshold` does.
    pub fn with_load_error_threshold(mut self, load_error_threshold: f64) -> Self {
        self.load_error_threshold = load_error_threshold;
        self
    }

    /// Makes loads reject `rows` rows of the staged file `file_name`.
    pub async fn reject_rows(&self, file_name: &str, rows: u64) {
        let mut inner = self.inner.lock().await;
        inner.rejected_rows.insert(file_name.to_string(), rows);
    }

    /// Makes every table operation on `table` fail.
    pub async fn fail_table(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_tables.insert(table.to_uppercase());
    }

    /// Sets the value returned by [`Warehouse::max_value`] for a table column.
    pub async fn set_max_value(&self, table: &str, column: &str, value: &str) {
        let mut inner = self.inner.lock().await;
        inner.max_values.insert(
            (table.to_uppercase(), column.to_string()),
            value.to_string(),
        );
    }

    /// Empties a table and forgets which files were loaded into it, like a native truncate.
    pub async fn truncate_table(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        let table = table.to_uppercase();
        inner.calls.push(format!("truncate_table {table}"));
        if let Some(state) = inner.tables.get_mut(&table) {
            state.row_count = 0;
            state.load_history.clear();
        }
    }

    pub async fn namespace_setups(&self) -> usize {
        self.inner.lock().await.namespace_setups
    }

    pub async fn has_stage(&self, table: &str) -> bool {
        let stage = format!("{}_STAGE", table.to_uppercase());
        self.inner.lock().await.stages.contains_key(&stage)
    }

    /// Names of the files pushed into the internal stage of `table`.
    pub async fn staged_files(&self, table: &str) -> Vec<String> {
        let stage = format!("{}_STAGE", table.to_uppercase());
        let inner = self.inner.lock().await;
        inner
            .stages
            .get(&stage)
            .map(|stage| stage.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        self.inner
            .lock()
            .await
            .tables
            .contains_key(&table.to_uppercase())
    }

    pub async fn row_count(&self, table: &str) -> Option<u64> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&table.to_uppercase())
            .map(|state| state.row_count)
    }

    pub async fn columns(&self, table: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&table.to_uppercase())
            .map(|state| state.columns.clone())
            .unwrap_or_default()
    }

    /// The table a view selects from.
    pub async fn view_source(&self, view_name: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.views.get(&view_name.to_uppercase()).cloned()
    }

    /// Every operation run against the warehouse, in order, as `<operation> <object>`.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.clone()
    }

    /// Staged files of `target` as `(identity, bytes)` pairs.
    async fn stage_files(&self, target: &WarehouseTarget) -> EtlResult<Vec<(String, Vec<u8>)>> {
        let location = {
            let inner = self.inner.lock().await;
            let Some(stage) = inner.stages.get(&target.stage_name) else {
                bail!(
                    ErrorKind::DestinationObjectNotFound,
                    "Stage does not exist",
                    target.stage_name
                );
            };

            match &stage.location {
                StageLocation::Internal => {
                    return Ok(stage
                        .files
                        .iter()
                        .map(|(name, bytes)| (name.clone(), bytes.clone()))
                        .collect());
                }
                StageLocation::External { url } => url.clone(),
            }
        };

        match &self.object_storage {
            Some(object_storage) => Ok(object_storage.objects_at(&location).await),
            None => Ok(vec![]),
        }
    }

    fn check_table(inner: &Inner, target: &WarehouseTarget) -> EtlResult<()> {
        if inner.failing_tables.contains(&target.table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Injected warehouse failure",
                target.table
            );
        }

        Ok(())
    }
}

/// Reads the column names and the number of data rows of a staged file.
fn read_staged_file(format: FileFormat, bytes: &[u8]) -> EtlResult<(Vec<String>, u64)> {
    match format {
        FileFormat::Csv => {
            let mut reader = ReaderBuilder::new()
                .delimiter(CSV_DELIMITER)
                .has_headers(true)
                .from_reader(bytes);

            let columns = reader.headers()?.iter().map(str::to_string).collect();
            let mut rows = 0;
            for record in reader.records() {
                record?;
                rows += 1;
            }

            Ok((columns, rows))
        }
        FileFormat::Parquet => {
            let reader = SerializedFileReader::new(Bytes::copy_from_slice(bytes))?;
            let metadata = reader.metadata().file_metadata();
            let columns = metadata
                .schema_descr()
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect();
            let rows = u64::try_from(metadata.num_rows()).map_err(|_| {
                etl_error!(
                    ErrorKind::InvalidData,
                    "Parquet file has a negative row count"
                )
            })?;

            Ok((columns, rows))
        }
    }
}

impl Warehouse for MemoryWarehouse {
    fn stage_type(&self) -> StageType {
        self.stage_type
    }

    fn target(&self, table: &str) -> WarehouseTarget {
        WarehouseTarget::new(&self.database, &self.schema, table, self.file_format)
    }

    async fn setup_namespace(&self) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.namespace_setups += 1;
        inner.calls.push(format!(
            "setup_namespace {}.{}",
            self.database.to_uppercase(),
            self.schema.to_uppercase()
        ));

        Ok(())
    }

    async fn create_stage(
        &self,
        target: &WarehouseTarget,
        location: &StageLocation,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        Self::check_table(&inner, target)?;
        inner.calls.push(format!("create_stage {}", target.stage_name));
        inner
            .stages
            .entry(target.stage_name.clone())
            .or_insert_with(|| MemoryStage {
                location: location.clone(),
                files: BTreeMap::new(),
            });

        Ok(())
    }

    async fn direct_transfer(
        &self,
        local_path: &Path,
        file_name: &str,
        target: &WarehouseTarget,
    ) -> EtlResult<()> {
        let bytes = tokio::fs::read(local_path).await?;

        let mut inner = self.inner.lock().await;
        inner.calls.push(format!("direct_transfer {file_name}"));
        let Some(stage) = inner.stages.get_mut(&target.stage_name) else {
            bail!(
                ErrorKind::DestinationObjectNotFound,
                "Stage does not exist",
                target.stage_name
            );
        };

        if stage.location != StageLocation::Internal {
            bail!(
                ErrorKind::InvalidState,
                "Files can only be pushed into internal stages",
                target.stage_name
            );
        }

        stage.files.insert(file_name.to_string(), bytes);

        Ok(())
    }

    async fn create_table(&self, target: &WarehouseTarget) -> EtlResult<()> {
        {
            let mut inner = self.inner.lock().await;
            Self::check_table(&inner, target)?;
            inner.calls.push(format!("create_table {}", target.table));
            if inner.tables.contains_key(&target.table) {
                return Ok(());
            }
        }

        let files = self.stage_files(target).await?;
        let Some((_, bytes)) = files.first() else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Cannot infer a table schema from an empty stage",
                target.stage_name
            );
        };
        let (columns, _) = read_staged_file(self.file_format, bytes)?;

        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(target.table.clone())
            .or_insert_with(|| MemoryTable {
                columns,
                ..MemoryTable::default()
            });

        Ok(())
    }

    async fn load(&self, target: &WarehouseTarget, mode: LoadMode) -> EtlResult<LoadSummary> {
        let files = self.stage_files(target).await?;
        let on_error = OnError::for_threshold(self.load_error_threshold);

        let mut inner = self.inner.lock().await;
        Self::check_table(&inner, target)?;
        inner.calls.push(format!("load {} {mode}", target.table));
        let Inner {
            tables,
            rejected_rows,
            ..
        } = &mut *inner;
        let Some(table) = tables.get_mut(&target.table) else {
            bail!(
                ErrorKind::DestinationObjectNotFound,
                "Table does not exist",
                target.table
            );
        };

        if mode == LoadMode::Replace {
            table.row_count = 0;
        }

        // Every file is checked before any row is loaded, like a single copy statement.
        let mut summary = LoadSummary::default();
        let mut accepted = Vec::new();
        for (identity, bytes) in files {
            if table.load_history.contains(&identity) {
                continue;
            }

            let (columns, rows) = read_staged_file(self.file_format, &bytes)?;
            let file_name = identity.rsplit('/').next().unwrap_or(&identity);
            let errors = rejected_rows.get(file_name).copied().unwrap_or(0).min(rows);
            summary.rows_parsed += rows;
            summary.errors_seen += errors;

            if on_error.rejects_file(errors, rows) {
                if on_error == OnError::AbortStatement {
                    bail!(
                        ErrorKind::DestinationQueryFailed,
                        "Load aborted on a rejected row",
                        format!("{errors} row(s) of {identity} were rejected")
                    );
                }

                summary.files_rejected += 1;
                continue;
            }

            accepted.push((identity, columns, rows - errors));
        }

        for (identity, columns, rows) in accepted {
            for column in columns {
                if !table
                    .columns
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(&column))
                {
                    table.columns.push(column);
                }
            }

            table.row_count += rows;
            table.load_history.insert(identity);
            summary.files_loaded += 1;
            summary.rows_loaded += rows;
        }

        info!(
            table = %target.table,
            files = summary.files_loaded,
            files_rejected = summary.files_rejected,
            rows = summary.rows_loaded,
            "loaded staged files"
        );
        summary.ensure_no_rejected_files(target)?;

        Ok(summary)
    }

    async fn create_view(&self, target: &WarehouseTarget, view_name: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let view_name = view_name.to_uppercase();
        inner.calls.push(format!("create_view {view_name}"));
        inner.views.insert(view_name, target.table.clone());

        Ok(())
    }

    async fn max_value(&self, target: &WarehouseTarget, column: &str) -> EtlResult<Option<String>> {
        let inner = self.inner.lock().await;
        Self::check_table(&inner, target)?;
        let Some(table) = inner.tables.get(&target.table) else {
            return Ok(None);
        };
        if table.row_count == 0 {
            return Ok(None);
        }

        Ok(inner
            .max_values
            .get(&(target.table.clone(), column.to_string()))
            .cloned())
    }
}
