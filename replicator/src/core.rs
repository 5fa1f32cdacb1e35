use etl::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use etl::orchestrator::ReplicationOrchestrator;
use etl::planning::plan_tables;
use etl::source::PostgresSourceReader;
use etl::stager::LocalStager;
use etl::table_pipeline::{ObjectStorage, PipelineSettings, TablePipeline};
use etl::transfer::{RemoteLayout, S3ObjectTransfer};
use etl::types::ReplicationReport;
use etl::warehouse::snowflake::{SnowflakeSettings, SnowflakeSqlClient, SnowflakeWarehouse};
use etl_config::LoadedReplicationConfig;
use etl_config::shared::{
    ObjectStorageConfig, ReplicationConfig, ReplicatorConfig, SourceConfig, StageType,
    WarehouseConfig,
};
use tracing::{error, info, warn};

use crate::config::{load_replicator_config, load_replications};

type ReplicatorPipeline =
    TablePipeline<PostgresSourceReader, S3ObjectTransfer, SnowflakeWarehouse<SnowflakeSqlClient>>;

pub async fn start_replicator() -> anyhow::Result<()> {
    info!("starting replicator");
    let replicator_config = load_replicator_config()?;
    log_replicator_config(&replicator_config);

    let replications = load_replications(&replicator_config)?;
    info!(count = replications.len(), "loaded replication configs");

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = tokio::spawn(listen_for_shutdown(shutdown_tx));

    let mut failed = Vec::new();
    for replication in replications {
        let name = replication.path.display().to_string();
        if !replication.config.enabled {
            info!(config = %name, "replication config is disabled, skipping it");
            continue;
        }
        if shutdown_rx.is_shutdown() {
            warn!(config = %name, "shutdown requested, replication config not started");
            failed.push(name);
            continue;
        }

        match run_replication(&replication, &replicator_config, shutdown_rx.clone()).await {
            Ok(report) if !report.has_failures() => {}
            Ok(report) => {
                for result in report.failed() {
                    if let Some(err) = &result.error {
                        error!(config = %name, table = %result.table_identity, error = %err, "table failed");
                    }
                }
                failed.push(name);
            }
            Err(err) => {
                error!(config = %name, error = %err, "replication failed");
                failed.push(name);
            }
        }
    }

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    if !failed.is_empty() {
        anyhow::bail!("replication failed for {}", failed.join(", "));
    }

    info!("replicator completed");
    Ok(())
}

#[tracing::instrument(skip_all, fields(config = %replication.path.display()))]
async fn run_replication(
    replication: &LoadedReplicationConfig,
    replicator_config: &ReplicatorConfig,
    shutdown_rx: ShutdownRx,
) -> anyhow::Result<ReplicationReport> {
    let config = &replication.config;
    log_replication_config(config);

    let max_workers = replicator_config.max_workers;
    let source = PostgresSourceReader::new(
        &config.source,
        config.source.max_connections.unwrap_or(max_workers),
    )?;
    source.test_connection().await?;

    let stager = LocalStager::new(
        config.extraction.local_directory.clone(),
        config.extraction.file_format,
    );

    let object_storage = match &config.object_storage {
        Some(object_storage) => Some(ObjectStorage {
            transfer: S3ObjectTransfer::new(object_storage).await?,
            layout: RemoteLayout::new(&object_storage.directory),
            date_partitioning: object_storage.date_partitioning,
        }),
        None => None,
    };

    let warehouse = match &config.warehouse {
        Some(warehouse) => {
            if warehouse.stage_type == StageType::Internal {
                warn!(
                    "internal stages receive files with PUT, which the SQL API rejects; files \
                     only reach object storage"
                );
            }

            let client = SnowflakeSqlClient::new(warehouse);
            client.test_connection().await?;
            Some(SnowflakeWarehouse::new(
                client,
                SnowflakeSettings::new(warehouse, config.extraction.file_format),
            ))
        }
        None => None,
    };

    let mut settings = PipelineSettings::new(&config.source.name, config.source.schema());
    settings.delete_after_transfer = config.extraction.delete_after_transfer;
    settings.upload_remaining_files = config.extraction.upload_remaining_files;

    let plan = plan_tables(
        &source,
        warehouse.as_ref(),
        config.source.schema(),
        &config.tables,
    )
    .await?;
    info!(
        tables = plan.tables.len(),
        skipped = plan.skipped.len(),
        failed = plan.failed.len(),
        "planned tables"
    );

    let pipeline: ReplicatorPipeline =
        TablePipeline::new(source, stager, object_storage, warehouse, settings);
    let orchestrator =
        ReplicationOrchestrator::new(pipeline, max_workers).with_shutdown(shutdown_rx);

    let mut report = orchestrator.start(plan.tables).await?;
    report.results.extend(plan.failed);

    Ok(report)
}

/// Requests a shutdown on SIGINT or SIGTERM.
///
/// Tables already running are finished, tables still waiting for a worker are not started.
async fn listen_for_shutdown(shutdown_tx: ShutdownTx) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(error = %err, "failed to register SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, shutting down");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
        }
    }

    if let Err(err) = shutdown_tx.shutdown() {
        warn!("failed to send shutdown signal: {:?}", err);
    }
}

fn log_replicator_config(config: &ReplicatorConfig) {
    info!(
        replications_dir = %config.replications_dir.display(),
        max_workers = config.max_workers,
        "replicator config"
    );
}

fn log_replication_config(config: &ReplicationConfig) {
    log_source_config(&config.source);
    info!(
        local_directory = %config.extraction.local_directory.display(),
        file_format = %config.extraction.file_format,
        delete_after_transfer = config.extraction.delete_after_transfer,
        upload_remaining_files = config.extraction.upload_remaining_files,
        tables = config.tables.len(),
        "extraction config"
    );
    if let Some(object_storage) = &config.object_storage {
        log_object_storage_config(object_storage);
    }
    if let Some(warehouse) = &config.warehouse {
        log_warehouse_config(warehouse);
    }
}

fn log_source_config(config: &SourceConfig) {
    info!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        schema = config.schema(),
        username = config.username,
        "source postgres connection config",
    );
}

fn log_object_storage_config(config: &ObjectStorageConfig) {
    info!(
        bucket = config.bucket,
        region = ?config.region,
        directory = config.directory,
        date_partitioning = config.date_partitioning,
        "object storage config"
    );
}

fn log_warehouse_config(config: &WarehouseConfig) {
    info!(
        account = config.account,
        database = config.database,
        schema = config.schema,
        stage_type = ?config.stage_type,
        load_error_threshold = config.load_error_threshold,
        "warehouse config"
    );
}
