use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::source::{ExtractionBatch, ExtractionQuery, SourceReader};
use crate::types::{ColumnSchema, TableRow};

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnSchema>,
    /// `None` stands for a row the source cannot decode.
    rows: Vec<Option<TableRow>>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
    failing_tables: HashSet<String>,
    executed_queries: Vec<ExtractionQuery>,
}

/// A [`SourceReader`] over tables held in memory.
///
/// Every table lives in every schema and filters are recorded but not evaluated. Selected fields
/// are projected by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceReader {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_table(&self, name: &str, columns: Vec<ColumnSchema>, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            name.to_string(),
            MemoryTable {
                columns,
                rows: rows.into_iter().map(Some).collect(),
            },
        );
    }

    /// Appends a row that fails to decode when the table is read.
    pub async fn add_undecodable_row(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.tables.get_mut(table) {
            table.rows.push(None);
        }
    }

    /// Makes every following query against `table` fail.
    pub async fn fail_queries_for(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_tables.insert(table.to_string());
    }

    pub async fn executed_queries(&self) -> Vec<ExtractionQuery> {
        let inner = self.inner.lock().await;
        inner.executed_queries.clone()
    }

    /// Resolves `query` to its column schemas and raw rows, recording it.
    async fn run(
        &self,
        query: &ExtractionQuery,
    ) -> EtlResult<(Vec<ColumnSchema>, Vec<Option<TableRow>>)> {
        let mut inner = self.inner.lock().await;
        inner.executed_queries.push(query.clone());

        if inner.failing_tables.contains(&query.table) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Extraction query failed",
                format!("injected failure for table {}", query.table)
            );
        }

        let Some(table) = inner.tables.get(&query.table) else {
            bail!(
                ErrorKind::SourceSchemaError,
                "PostgreSQL schema object not found",
                format!("relation \"{}.{}\" does not exist", query.schema, query.table)
            );
        };

        if query.fields.is_empty() {
            return Ok((table.columns.clone(), table.rows.clone()));
        }

        let mut positions = Vec::with_capacity(query.fields.len());
        for field in &query.fields {
            let Some(position) = table.columns.iter().position(|c| &c.name == field) else {
                bail!(
                    ErrorKind::SourceSchemaError,
                    "PostgreSQL schema object not found",
                    format!("column \"{field}\" does not exist")
                );
            };
            positions.push(position);
        }

        let columns = positions
            .iter()
            .map(|&position| table.columns[position].clone())
            .collect();
        let rows = table
            .rows
            .iter()
            .map(|row| {
                row.as_ref().map(|row| {
                    TableRow::new(
                        positions
                            .iter()
                            .map(|&position| row.values[position].clone())
                            .collect(),
                    )
                })
            })
            .collect();

        Ok((columns, rows))
    }
}

fn into_batch(
    sequence_index: usize,
    columns: Vec<ColumnSchema>,
    raw_rows: Vec<Option<TableRow>>,
) -> ExtractionBatch {
    let mut rows = Vec::with_capacity(raw_rows.len());
    let mut skipped_rows = 0;
    for row in raw_rows {
        match row {
            Some(row) => rows.push(row),
            None => {
                warn!("skipping source row that could not be decoded");
                skipped_rows += 1;
            }
        }
    }

    ExtractionBatch {
        rows,
        columns,
        sequence_index,
        skipped_rows,
    }
}

impl SourceReader for MemorySourceReader {
    async fn list_tables(&self, _schema: &str) -> EtlResult<HashSet<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.keys().cloned().collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> EtlResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let Some(table) = inner.tables.get(table) else {
            bail!(
                ErrorKind::SourceSchemaError,
                "Source table has no visible columns",
                format!("{schema}.{table}")
            );
        };

        Ok(table.columns.iter().map(|c| c.name.clone()).collect())
    }

    async fn count_rows(&self, query: &ExtractionQuery) -> EtlResult<u64> {
        let (_, rows) = self.run(query).await?;
        Ok(rows.len() as u64)
    }

    async fn execute(&self, query: &ExtractionQuery) -> EtlResult<ExtractionBatch> {
        let (columns, rows) = self.run(query).await?;
        Ok(into_batch(0, columns, rows))
    }

    async fn execute_batched(
        &self,
        query: &ExtractionQuery,
        batch_size: usize,
    ) -> EtlResult<BoxStream<'static, EtlResult<ExtractionBatch>>> {
        if batch_size == 0 {
            bail!(ErrorKind::ValidationError, "Batch size must be positive");
        }

        let (columns, rows) = self.run(query).await?;
        let batches: Vec<EtlResult<ExtractionBatch>> = rows
            .chunks(batch_size)
            .enumerate()
            .map(|(sequence_index, chunk)| {
                Ok(into_batch(sequence_index, columns.clone(), chunk.to_vec()))
            })
            .collect();

        Ok(stream::iter(batches).boxed())
    }
}
