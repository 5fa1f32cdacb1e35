use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use etl_config::shared::SourceConfig;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlResult};
use crate::source::stream::{CopiedRow, TableCopyStream};
use crate::source::{ExtractionBatch, ExtractionQuery, SourceReader};
use crate::types::ColumnSchema;
use crate::{bail, etl_error};

/// Reads the source tables of a Postgres database through a connection pool.
///
/// Every query checks a connection out of the pool for its own duration, so one reader can be
/// cloned into every table pipeline of a run.
#[derive(Debug, Clone)]
pub struct PostgresSourceReader {
    pool: Pool,
}

impl PostgresSourceReader {
    /// Creates a reader with a pool of at most `max_connections` connections.
    ///
    /// No connection is opened until the first query, see [`Self::test_connection`].
    pub fn new(config: &SourceConfig, max_connections: usize) -> EtlResult<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.username)
            .application_name("replicator");
        if let Some(password) = &config.password {
            pg_config.password(password.expose());
        }

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(max_connections.max(1))
            .build()
            .map_err(|err| {
                etl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Failed to create the source connection pool",
                    err
                )
            })?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Checks out a connection and runs a trivial query on it.
    pub async fn test_connection(&self) -> EtlResult<()> {
        let connection = self.pool.get().await?;
        connection.simple_query("SELECT 1").await?;
        info!("source database connection is healthy");

        Ok(())
    }

    /// Starts a `COPY` of `query` and returns the schema of its columns with the row stream.
    async fn copy_stream(
        &self,
        query: &ExtractionQuery,
    ) -> EtlResult<(Arc<[ColumnSchema]>, TableCopyStream<Object>)> {
        let connection = self.pool.get().await?;

        // Preparing the select resolves the result columns without running it.
        let statement = connection.prepare(&query.to_sql()).await?;
        let column_schemas: Arc<[ColumnSchema]> = statement
            .columns()
            .iter()
            .map(|column| ColumnSchema::new(column.name(), column.type_().clone()))
            .collect();

        let copy_sql = query.copy_sql();
        debug!(query = %copy_sql, "starting copy out of source table");
        let stream = connection.copy_out(copy_sql.as_str()).await?;

        Ok((
            column_schemas.clone(),
            TableCopyStream::wrap(stream, column_schemas, connection),
        ))
    }
}

impl SourceReader for PostgresSourceReader {
    async fn list_tables(&self, schema: &str) -> EtlResult<HashSet<String>> {
        let connection = self.pool.get().await?;
        let rows = connection
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type IN ('BASE TABLE', 'VIEW')",
                &[&schema],
            )
            .await?;

        let mut tables = HashSet::with_capacity(rows.len());
        for row in rows {
            tables.insert(row.try_get::<_, String>(0)?);
        }

        Ok(tables)
    }

    async fn list_columns(&self, schema: &str, table: &str) -> EtlResult<Vec<String>> {
        let connection = self.pool.get().await?;
        let rows = connection
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(row.try_get::<_, String>(0)?);
        }

        if columns.is_empty() {
            bail!(
                ErrorKind::SourceSchemaError,
                "Source table has no visible columns",
                format!("{schema}.{table}")
            );
        }

        Ok(columns)
    }

    async fn count_rows(&self, query: &ExtractionQuery) -> EtlResult<u64> {
        let connection = self.pool.get().await?;
        let row = connection.query_one(query.count_sql().as_str(), &[]).await?;
        let count: i64 = row.try_get(0)?;

        Ok(count.max(0) as u64)
    }

    async fn execute(&self, query: &ExtractionQuery) -> EtlResult<ExtractionBatch> {
        let (columns, stream) = self.copy_stream(query).await?;
        let mut stream = pin!(stream);

        let mut rows = Vec::new();
        let mut skipped_rows = 0;
        while let Some(row) = stream.next().await {
            match row? {
                CopiedRow::Decoded(row) => rows.push(row),
                CopiedRow::Undecodable(_) => skipped_rows += 1,
            }
        }

        Ok(ExtractionBatch {
            rows,
            columns: columns.to_vec(),
            sequence_index: 0,
            skipped_rows,
        })
    }

    async fn execute_batched(
        &self,
        query: &ExtractionQuery,
        batch_size: usize,
    ) -> EtlResult<BoxStream<'static, EtlResult<ExtractionBatch>>> {
        if batch_size == 0 {
            bail!(ErrorKind::ValidationError, "Batch size must be positive");
        }

        let (columns, stream) = self.copy_stream(query).await?;

        let batches = stream.chunks(batch_size).enumerate().map(
            move |(sequence_index, chunk)| -> EtlResult<ExtractionBatch> {
                let mut rows = Vec::with_capacity(chunk.len());
                let mut skipped_rows = 0;
                for row in chunk {
                    match row? {
                        CopiedRow::Decoded(row) => rows.push(row),
                        CopiedRow::Undecodable(_) => skipped_rows += 1,
                    }
                }

                Ok(ExtractionBatch {
                    rows,
                    columns: columns.to_vec(),
                    sequence_index,
                    skipped_rows,
                })
            },
        );

        Ok(batches.boxed())
    }
}
