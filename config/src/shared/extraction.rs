use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::shared::ValidationError;

/// Encoding of the files written to local storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// `|`-delimited text with a header row.
    Csv,
    /// Columnar Parquet files.
    #[default]
    Parquet,
}

impl FileFormat {
    /// File extension used for files of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where and how extracted batches are staged on local storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionConfig {
    /// Root of the local staging tree.
    pub local_directory: PathBuf,
    #[serde(default)]
    pub file_format: FileFormat,
    /// Delete a local file once at least one transfer of it succeeded.
    #[serde(default = "default_true")]
    pub delete_after_transfer: bool,
    /// Transfer every file found in the table directory, not only the ones written by this run.
    #[serde(default = "default_true")]
    pub upload_remaining_files: bool,
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.local_directory.as_os_str().is_empty() {
            return Err(ValidationError::EmptyField("extraction.local_directory"));
        }

        Ok(())
    }
}

pub(crate) fn default_true() -> bool {
    true
}
