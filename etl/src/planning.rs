//! Turns validated table configs into the replications of one run.

use etl_config::shared::{IngestionMode, TableConfig};
use tracing::{info, warn};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::source::{SourceReader, incremental_filter};
use crate::types::{LoadMode, TableReplication, TableRunStats, TaskResult};
use crate::warehouse::Warehouse;

/// Tables to replicate in one run and the tables left out of it.
#[derive(Debug, Clone, Default)]
pub struct TablePlan {
    pub tables: Vec<TableReplication>,
    /// Tables with replication disabled or missing from the source schema.
    pub skipped: Vec<String>,
    /// Tables whose extraction could not be planned, reported under `<schema>.<source table>`.
    pub failed: Vec<TaskResult>,
}

/// Builds the [`TableReplication`] of every replicable table of `configs`.
///
/// Incremental tables read their lower bound from the largest value of the incremental column
/// already loaded into the target table, and load in [`LoadMode::Append`]. Without a bound the
/// whole table is extracted. A table whose bound cannot be resolved ends up in
/// [`TablePlan::failed`] and the other tables are still planned.
pub async fn plan_tables<R, W>(
    source: &R,
    warehouse: Option<&W>,
    schema: &str,
    configs: &[TableConfig],
) -> EtlResult<TablePlan>
where
    R: SourceReader,
    W: Warehouse,
{
    let source_tables = source.list_tables(schema).await?;
    let mut plan = TablePlan::default();

    for config in configs {
        if !config.replicate {
            info!(table = %config.table_name, "replication is disabled for table");
            plan.skipped.push(config.table_name.clone());
            continue;
        }

        if !source_tables.contains(&config.table_name) {
            warn!(table = %config.table_name, schema, "table does not exist in the source, skipping it");
            plan.skipped.push(config.table_name.clone());
            continue;
        }

        let mut table = TableReplication::new(&config.table_name)
            .with_target_table_name(config.target_table_name())
            .with_selected_fields(config.fields.iter().cloned());
        if let Some(batch_size) = config.batch_size {
            table = table.with_batch_size(batch_size);
        }
        if let Some(view_name) = &config.view_name {
            table = table.with_view_name(view_name);
        }

        let where_clause = config
            .where_clause
            .as_deref()
            .filter(|clause| !clause.trim().is_empty());

        let filter = match config.ingestion_mode {
            IngestionMode::FullLoad => where_clause.map(str::to_string),
            IngestionMode::Incremental => {
                table = table.with_load_mode(LoadMode::Append);

                let (Some(column), Some(warehouse)) =
                    (config.incremental_column.as_deref(), warehouse)
                else {
                    let err = etl_error!(
                        ErrorKind::ConfigError,
                        "Incremental table needs an incremental column and a warehouse",
                        config.table_name
                    );
                    plan.fail(schema, &config.table_name, err);
                    continue;
                };

                let target = warehouse.target(config.target_table_name());
                match warehouse.max_value(&target, column).await {
                    Ok(Some(bound)) => {
                        info!(table = %config.table_name, column, bound = %bound, "resolved incremental bound");
                        Some(incremental_filter(column, &bound, where_clause))
                    }
                    Ok(None) => {
                        info!(table = %config.table_name, column, "target table is empty, extracting every row");
                        where_clause.map(str::to_string)
                    }
                    Err(err) => {
                        plan.fail(schema, &config.table_name, err);
                        continue;
                    }
                }
            }
        };

        if let Some(filter) = filter {
            table = table.with_filter_clause(filter);
        }

        plan.tables.push(table);
    }

    Ok(plan)
}

impl TablePlan {
    fn fail(&mut self, schema: &str, table: &str, err: EtlError) {
        warn!(table, error = %err, "failed to plan table, it will not be replicated");
        self.failed.push(TaskResult::failed(
            format!("{schema}.{table}"),
            err,
            TableRunStats::default(),
        ));
    }
}
