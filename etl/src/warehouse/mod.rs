//! Loading staged files into warehouse tables.

use etl_config::shared::{FileFormat, StageType};
use std::future::Future;
use std::path::Path;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::LoadMode;

pub mod snowflake;

/// Warehouse objects backing one replicated table.
///
/// Names are upper-cased the way the warehouse folds unquoted identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarehouseTarget {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub stage_name: String,
    pub file_format_name: String,
}

impl WarehouseTarget {
    pub fn new(database: &str, schema: &str, table: &str, format: FileFormat) -> Self {
        let table = table.to_uppercase();

        Self {
            database: database.to_uppercase(),
            schema: schema.to_uppercase(),
            stage_name: format!("{table}_STAGE"),
            file_format_name: file_format_name(format),
            table,
        }
    }

    pub fn qualified_table(&self) -> String {
        self.qualify(&self.table)
    }

    pub fn qualified_stage(&self) -> String {
        self.qualify(&self.stage_name)
    }

    pub fn qualified_file_format(&self) -> String {
        self.qualify(&self.file_format_name)
    }

    pub fn qualified_view(&self, view_name: &str) -> String {
        self.qualify(&view_name.to_uppercase())
    }

    fn qualify(&self, name: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_identifier(&self.database),
            quote_identifier(&self.schema),
            quote_identifier(name)
        )
    }
}

/// Name of the file format object shared by every table of a database.
pub fn file_format_name(format: FileFormat) -> String {
    format!("REPLICATION_{}_FORMAT", format.extension().to_uppercase())
}

pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Where the files of a stage live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageLocation {
    /// Files are pushed into the warehouse with [`Warehouse::direct_transfer`].
    Internal,
    /// Files are read from object storage below `url`.
    External { url: String },
}

/// What a load does with a staged file containing rejected rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// The first rejected row aborts the whole load, nothing is loaded.
    AbortStatement,
    /// A file whose share of rejected rows exceeds the percentage is skipped as a whole. Other
    /// files load without their rejected rows.
    SkipFilePercent(u8),
}

impl OnError {
    /// Rejection policy enforcing `load_error_threshold`, a fraction of rows in `[0, 1]`.
    ///
    /// The threshold is rounded down to a whole percentage, so a file is never loaded with more
    /// rejected rows than configured. Thresholds under one percent abort on the first error.
    pub fn for_threshold(load_error_threshold: f64) -> Self {
        // Absorbs binary rounding of thresholds such as 0.29.
        let percent = (load_error_threshold * 100.0 + 1e-9).floor();
        if percent < 1.0 {
            OnError::AbortStatement
        } else {
            OnError::SkipFilePercent(percent.min(100.0) as u8)
        }
    }

    /// Whether a file with `errors_seen` rejected rows out of `rows_parsed` is left unloaded.
    pub fn rejects_file(&self, errors_seen: u64, rows_parsed: u64) -> bool {
        match self {
            OnError::AbortStatement => errors_seen > 0,
            OnError::SkipFilePercent(percent) => errors_seen * 100 > u64::from(*percent) * rows_parsed,
        }
    }
}

/// Outcome of a [`Warehouse::load`], summed over the staged files it considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub files_loaded: usize,
    /// Files skipped because too many of their rows were rejected. They stay out of the load
    /// history, so the next load tries them again.
    pub files_rejected: usize,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub errors_seen: u64,
}

impl LoadSummary {
    /// Fraction of parsed rows that were rejected.
    pub fn error_ratio(&self) -> f64 {
        if self.rows_parsed == 0 {
            0.0
        } else {
            self.errors_seen as f64 / self.rows_parsed as f64
        }
    }

    /// Fails when the load skipped a file for exceeding the error threshold.
    pub fn ensure_no_rejected_files(&self, target: &WarehouseTarget) -> EtlResult<()> {
        if self.files_rejected > 0 {
            bail!(
                ErrorKind::LoadErrorThresholdExceeded,
                "Staged files were skipped for exceeding the load error threshold",
                format!(
                    "{} file(s) of table {} were not loaded, {} of {} rows were rejected",
                    self.files_rejected, target.table, self.errors_seen, self.rows_parsed
                )
            );
        }

        Ok(())
    }
}

/// Warehouse operations a table pipeline needs.
///
/// Every creating operation is idempotent, so re-running a table after a failure is safe.
pub trait Warehouse {
    /// How files reach the stages of this warehouse.
    fn stage_type(&self) -> StageType;

    /// The warehouse objects of the target table `table`.
    fn target(&self, table: &str) -> WarehouseTarget;

    /// Creates the database, schema and file format shared by every table. Runs once per run.
    fn setup_namespace(&self) -> impl Future<Output = EtlResult<()>> + Send;

    fn create_stage(
        &self,
        target: &WarehouseTarget,
        location: &StageLocation,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Pushes a local file into the internal stage of `target`, replacing a file of the same name.
    fn direct_transfer(
        &self,
        local_path: &Path,
        file_name: &str,
        target: &WarehouseTarget,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Creates the target table from the schema inferred over the staged files, if it is missing.
    fn create_table(&self, target: &WarehouseTarget) -> impl Future<Output = EtlResult<()>> + Send;

    /// Loads the staged files not loaded before into the target table.
    ///
    /// [`LoadMode::Replace`] deletes the existing rows first. The delete keeps the load history of
    /// the table, so files already loaded by an earlier run are not loaded again. Files with more
    /// rejected rows than the configured threshold are never partially loaded: the load is aborted
    /// or the file is skipped, and the load fails with [`ErrorKind::LoadErrorThresholdExceeded`].
    fn load(
        &self,
        target: &WarehouseTarget,
        mode: LoadMode,
    ) -> impl Future<Output = EtlResult<LoadSummary>> + Send;

    /// Creates or replaces a view selecting every column of the target table.
    fn create_view(
        &self,
        target: &WarehouseTarget,
        view_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Largest value of `column` in the target table, `None` when the table is missing or empty.
    fn max_value(
        &self,
        target: &WarehouseTarget,
        column: &str,
    ) -> impl Future<Output = EtlResult<Option<String>>> + Send;
}
