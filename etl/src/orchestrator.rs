//! Runs the table pipelines of one replication on a bounded worker pool.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::metrics::register_metrics;
use crate::source::SourceReader;
use crate::table_pipeline::TablePipeline;
use crate::transfer::ObjectTransfer;
use crate::types::{ReplicationReport, TableReplication, TableRunStats, TaskResult};
use crate::warehouse::Warehouse;

/// Dispatches one [`TablePipeline`] run per table, with at most `max_workers` running at a time.
///
/// A failing or panicking table never affects the others. Every dispatched table is awaited
/// before [`ReplicationOrchestrator::start`] returns.
#[derive(Debug)]
pub struct ReplicationOrchestrator<R, T, W> {
    pipeline: Arc<TablePipeline<R, T, W>>,
    max_workers: usize,
    shutdown_rx: Option<ShutdownRx>,
}

impl<R, T, W> ReplicationOrchestrator<R, T, W>
where
    R: SourceReader + Send + Sync + 'static,
    T: ObjectTransfer + Send + Sync + 'static,
    W: Warehouse + Send + Sync + 'static,
{
    pub fn new(pipeline: TablePipeline<R, T, W>, max_workers: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            max_workers,
            shutdown_rx: None,
        }
    }

    /// Stops dispatching tables once a shutdown is requested on `shutdown_rx`.
    pub fn with_shutdown(mut self, shutdown_rx: ShutdownRx) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    pub fn pipeline(&self) -> &TablePipeline<R, T, W> {
        &self.pipeline
    }

    /// Replicates `tables` and returns one result per table.
    ///
    /// The warehouse namespace is set up once before any table runs, a failure there fails the
    /// whole run. Tables not enabled for replication are reported as skipped. Tables still waiting
    /// for a worker when a shutdown is requested are reported as failed.
    pub async fn start(&self, tables: Vec<TableReplication>) -> EtlResult<ReplicationReport> {
        register_metrics();

        if self.max_workers == 0 {
            bail!(
                ErrorKind::ConfigError,
                "The worker pool needs at least one worker"
            );
        }

        if let Some(warehouse) = self.pipeline.warehouse() {
            warehouse.setup_namespace().await?;
        }

        let mut report = ReplicationReport::default();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();

        let mut tables = tables.into_iter();
        while let Some(table) = tables.next() {
            let table_identity = self.pipeline.table_identity(&table);
            if !table.replicate {
                info!(table = %table_identity, "replication is disabled for table, skipping it");
                report.skipped.push(table_identity);
                continue;
            }

            let Some(permit) = self.acquire(&semaphore).await? else {
                warn!("shutdown requested, no further tables are dispatched");
                report.results.push(cancelled(table_identity));
                for table in tables.by_ref() {
                    let table_identity = self.pipeline.table_identity(&table);
                    if table.replicate {
                        report.results.push(cancelled(table_identity));
                    } else {
                        report.skipped.push(table_identity);
                    }
                }
                break;
            };

            let pipeline = self.pipeline.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                pipeline.run(&table).await
            });
            running.insert(handle.id(), table_identity);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    running.remove(&id);
                    report.results.push(result);
                }
                Err(join_err) => {
                    let table_identity = running.remove(&join_err.id()).unwrap_or_default();
                    let error = if join_err.is_panic() {
                        let message = panic_message(join_err.into_panic());
                        error!(table = %table_identity, panic = %message, "table pipeline panicked");
                        etl_error!(
                            ErrorKind::PipelinePanic,
                            "Table pipeline panicked",
                            message
                        )
                    } else {
                        etl_error!(
                            ErrorKind::PipelineCancelled,
                            "Table pipeline was cancelled",
                            table_identity
                        )
                    };

                    report.results.push(TaskResult::failed(
                        table_identity,
                        error,
                        TableRunStats::default(),
                    ));
                }
            }
        }

        info!(
            completed = report.completed().count(),
            failed = report.failed().count(),
            skipped = report.skipped.len(),
            "replication run finished"
        );

        Ok(report)
    }

    /// Waits for a free worker. Returns `None` when a shutdown is requested first.
    async fn acquire(&self, semaphore: &Arc<Semaphore>) -> EtlResult<Option<OwnedSemaphorePermit>> {
        let acquire = semaphore.clone().acquire_owned();

        let permit = match &self.shutdown_rx {
            Some(shutdown_rx) => {
                if shutdown_rx.is_shutdown() {
                    return Ok(None);
                }

                let mut shutdown_rx = shutdown_rx.clone();
                tokio::select! {
                    biased;
                    _ = shutdown_rx.wait() => return Ok(None),
                    permit = acquire => permit,
                }
            }
            None => acquire.await,
        };

        permit.map(Some).map_err(|err| {
            etl_error!(
                ErrorKind::InvalidState,
                "The worker pool was closed",
                err
            )
        })
    }
}

fn cancelled(table_identity: String) -> TaskResult {
    let error = etl_error!(
        ErrorKind::PipelineCancelled,
        "Table was not dispatched because of a shutdown",
        table_identity
    );

    TaskResult::failed(table_identity, error, TableRunStats::default())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
