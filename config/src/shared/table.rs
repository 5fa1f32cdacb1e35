use serde::Deserialize;

use crate::shared::extraction::default_true;
use crate::shared::{ValidationError, require_non_empty};

/// How rows of a table are selected on each run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// Every row, every run.
    #[default]
    FullLoad,
    /// Only rows whose `incremental_column` exceeds the target table's maximum.
    Incremental,
}

/// Replication settings of one source table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    pub table_name: String,
    /// Name of the warehouse table and of the local directory. Defaults to `table_name`.
    #[serde(default)]
    pub target_table_name: Option<String>,
    /// Columns to extract, in order. Empty means every column.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub ingestion_mode: IngestionMode,
    #[serde(default)]
    pub incremental_column: Option<String>,
    /// Extra predicate appended to the extraction query.
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
    /// Rows per output file. A single file is written when absent.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_true")]
    pub replicate: bool,
    /// View created over the loaded table.
    #[serde(default)]
    pub view_name: Option<String>,
}

impl TableConfig {
    pub fn target_table_name(&self) -> &str {
        self.target_table_name.as_deref().unwrap_or(&self.table_name)
    }

    /// Validates the table on its own; `has_warehouse` tells whether the enclosing config loads
    /// into a warehouse.
    pub fn validate(&self, has_warehouse: bool) -> Result<(), ValidationError> {
        require_non_empty(&self.table_name, "tables.table_name")?;
        if let Some(target) = &self.target_table_name {
            require_non_empty(target, "tables.target_table_name")?;
        }

        if self.batch_size == Some(0) {
            return Err(ValidationError::InvalidBatchSize(self.table_name.clone()));
        }

        if self.ingestion_mode == IngestionMode::Incremental {
            if self
                .incremental_column
                .as_deref()
                .is_none_or(|column| column.trim().is_empty())
            {
                return Err(ValidationError::MissingIncrementalColumn(
                    self.table_name.clone(),
                ));
            }

            if !has_warehouse {
                return Err(ValidationError::IncrementalWithoutWarehouse(
                    self.table_name.clone(),
                ));
            }
        }

        Ok(())
    }
}
