//! Reading rows out of the source database.

use futures::stream::BoxStream;
use std::collections::HashSet;
use std::future::Future;

use crate::error::EtlResult;
use crate::types::{ColumnSchema, TableRow};

mod postgres;
mod query;
mod stream;

pub use postgres::PostgresSourceReader;
pub use query::{ExtractionQuery, incremental_filter, quote_identifier, quote_literal};
pub use stream::{CopiedRow, TableCopyStream};

/// Rows returned by one extraction call, in the order the source produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionBatch {
    pub rows: Vec<TableRow>,
    pub columns: Vec<ColumnSchema>,
    /// Zero based position of the batch in a batched extraction, always `0` in bulk mode.
    pub sequence_index: usize,
    /// Rows of this batch that could not be decoded and were left out.
    pub skipped_rows: u64,
}

impl ExtractionBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read access to the source database.
///
/// Undecodable rows never fail an extraction: they are logged, left out of the batch and counted
/// in [`ExtractionBatch::skipped_rows`]. Query level failures are returned as errors.
pub trait SourceReader {
    /// Returns the names of the tables of `schema`.
    fn list_tables(&self, schema: &str) -> impl Future<Output = EtlResult<HashSet<String>>> + Send;

    /// Returns the column names of `table` in their ordinal order.
    fn list_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = EtlResult<Vec<String>>> + Send;

    fn count_rows(&self, query: &ExtractionQuery) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Runs `query` and returns every row in a single batch.
    fn execute(
        &self,
        query: &ExtractionQuery,
    ) -> impl Future<Output = EtlResult<ExtractionBatch>> + Send;

    /// Runs `query` and streams its rows in batches of at most `batch_size` rows.
    fn execute_batched(
        &self,
        query: &ExtractionQuery,
        batch_size: usize,
    ) -> impl Future<Output = EtlResult<BoxStream<'static, EtlResult<ExtractionBatch>>>> + Send;
}
