use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const ETL_ROWS_EXTRACTED_TOTAL: &str = "etl_rows_extracted_total";
pub const ETL_ROWS_SKIPPED_TOTAL: &str = "etl_rows_skipped_total";
pub const ETL_FILES_WRITTEN_TOTAL: &str = "etl_files_written_total";
pub const ETL_FILES_TRANSFERRED_TOTAL: &str = "etl_files_transferred_total";
pub const ETL_TRANSFER_FAILURES_TOTAL: &str = "etl_transfer_failures_total";
pub const ETL_TABLE_TASKS_TOTAL: &str = "etl_table_tasks_total";
pub const ETL_TABLE_DURATION_SECONDS: &str = "etl_table_duration_seconds";
pub const TABLE: &str = "table";
pub const STATUS: &str = "status";
pub const TRANSFER: &str = "transfer";
pub const OBJECT_STORAGE: &str = "object_storage";
pub const WAREHOUSE_STAGE: &str = "warehouse_stage";

/// Register metrics emitted by etl. This should be called before starting a run.
/// It is safe to call this method multiple times, the metrics are registered only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            ETL_ROWS_EXTRACTED_TOTAL,
            Unit::Count,
            "Total number of rows read from the source database"
        );

        describe_counter!(
            ETL_ROWS_SKIPPED_TOTAL,
            Unit::Count,
            "Total number of source rows skipped because they could not be decoded"
        );

        describe_counter!(
            ETL_FILES_WRITTEN_TOTAL,
            Unit::Count,
            "Total number of files written to local storage"
        );

        describe_counter!(
            ETL_FILES_TRANSFERRED_TOTAL,
            Unit::Count,
            "Total number of files transferred to object storage or a warehouse stage"
        );

        describe_counter!(
            ETL_TRANSFER_FAILURES_TOTAL,
            Unit::Count,
            "Total number of failed file transfers"
        );

        describe_counter!(
            ETL_TABLE_TASKS_TOTAL,
            Unit::Count,
            "Total number of finished table tasks, labeled by status"
        );

        describe_histogram!(
            ETL_TABLE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to replicate one table"
        );
    });
}
