//! Staging extracted batches as files on local storage.

use chrono::{DateTime, Utc};
use etl_config::shared::FileFormat;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EtlResult;
use crate::metrics::ETL_FILES_WRITTEN_TOTAL;
use crate::types::{ColumnSchema, TableRow};

mod csv;
mod parquet;

pub use self::csv::{CSV_DELIMITER, encode_csv};
pub use self::parquet::{encode_parquet, postgres_to_arrow_type};

/// Format of the timestamp that starts every staged file name.
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Position of one table in the staging tree.
///
/// The schema level is omitted when it has the same name as the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub database: String,
    pub schema: Option<String>,
    pub table: String,
}

impl TableLayout {
    pub fn new(database: &str, schema: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: (schema != database).then(|| schema.to_string()),
            table: table.to_string(),
        }
    }

    /// Directory levels of the table, from the database down.
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.database.as_str()];
        if let Some(schema) = &self.schema {
            segments.push(schema);
        }
        segments.push(&self.table);

        segments
    }
}

/// Name of a staged file: `<timestamp>[_<batch_index>].<ext>`.
pub fn staged_file_name(
    timestamp: DateTime<Utc>,
    batch_index: Option<usize>,
    format: FileFormat,
) -> String {
    let timestamp = timestamp.format(FILE_TIMESTAMP_FORMAT);
    match batch_index {
        Some(index) => format!("{timestamp}_{index}.{}", format.extension()),
        None => format!("{timestamp}.{}", format.extension()),
    }
}

/// A file written for one table, not yet transferred.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub local_path: PathBuf,
    /// Object key once the file was uploaded.
    pub remote_path: Option<String>,
    pub table_identity: String,
    pub created_at: DateTime<Utc>,
    pub rows: usize,
}

impl StagedFile {
    pub fn file_name(&self) -> Option<&str> {
        self.local_path.file_name().and_then(|name| name.to_str())
    }
}

/// Writes, lists and deletes the files of the local staging tree.
#[derive(Debug, Clone)]
pub struct LocalStager {
    root: PathBuf,
    format: FileFormat,
}

impl LocalStager {
    pub fn new(root: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory holding every file of `layout`.
    pub fn table_directory(&self, layout: &TableLayout) -> PathBuf {
        layout
            .segments()
            .into_iter()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Encodes `rows` in the stager format and writes them to `path`.
    ///
    /// The bytes are written to a hidden sibling file first and renamed into place, so a crash
    /// never leaves a truncated file for the next sweep to pick up.
    pub async fn write(
        &self,
        path: &Path,
        rows: &[TableRow],
        columns: &[ColumnSchema],
    ) -> EtlResult<()> {
        let bytes = match self.format {
            FileFormat::Csv => encode_csv(rows, columns)?,
            FileFormat::Parquet => encode_parquet(rows, columns)?,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial_path = partial_path(path)?;
        tokio::fs::write(&partial_path, &bytes).await?;
        tokio::fs::rename(&partial_path, path).await?;

        metrics::counter!(ETL_FILES_WRITTEN_TOTAL).increment(1);
        debug!(path = %path.display(), rows = rows.len(), bytes = bytes.len(), "wrote staged file");

        Ok(())
    }

    /// Returns the names of the staged files of `directory` in name order.
    ///
    /// Hidden files and files of another format are ignored and a missing directory has no files.
    pub async fn list_files(&self, directory: &Path) -> EtlResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let extension = self.format.extension();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let matches_format = Path::new(&name)
                .extension()
                .is_some_and(|ext| ext == extension);
            if !name.starts_with('.') && matches_format {
                files.push(name);
            }
        }
        files.sort();

        Ok(files)
    }

    pub async fn delete(&self, path: &Path) -> EtlResult<()> {
        tokio::fs::remove_file(path).await?;
        debug!(path = %path.display(), "deleted staged file");

        Ok(())
    }
}

fn partial_path(path: &Path) -> EtlResult<PathBuf> {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        crate::bail!(
            crate::error::ErrorKind::InvalidState,
            "Staged file path has no file name",
            path.display()
        );
    };

    Ok(path.with_file_name(format!(".{name}.partial")))
}
