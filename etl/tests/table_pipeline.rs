mod common;

use chrono::{TimeZone, Utc};
use etl::error::ErrorKind;
use etl::table_pipeline::{ObjectStorage, PipelineSettings};
use etl::types::{LoadMode, TableReplication, TaskStatus};
use etl::warehouse::Warehouse;
use etl_config::shared::FileFormat;
use etl_telemetry::init_test_tracing;

use crate::common::{REMOTE_PREFIX, TestContext, read_csv_ids, run_time};

#[tokio::test(flavor = "multi_thread")]
async fn bulk_table_is_uploaded_and_loaded() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(&TableReplication::new("orders"), run_time(0))
        .await;

    assert_eq!(result.status, TaskStatus::Completed, "{:?}", result.error);
    assert_eq!(result.table_identity, "public.orders");
    assert_eq!(result.stats.rows_extracted, 3);
    assert_eq!(result.stats.files_written, 1);
    assert_eq!(result.stats.files_transferred, 1);
    assert_eq!(result.stats.rows_loaded, 3);

    assert_eq!(
        ctx.transfer.keys_under(REMOTE_PREFIX).await,
        vec!["replication/shop/public/orders/year=2024/month=5/day=17/20240517100000.parquet"]
    );
    assert!(ctx.local_files("orders").await.is_empty());

    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
    assert_eq!(ctx.warehouse.columns("orders").await, vec!["id", "amount"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_transfer_leaves_only_that_file() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.transfer.fail_files_ending_with("_1.csv").await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(
            &TableReplication::new("events").with_batch_size(2),
            run_time(0),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.files_written, 3);
    assert_eq!(result.stats.files_transferred, 2);
    assert_eq!(result.stats.files_retained, 1);

    let remaining = ctx.local_files("events").await;
    assert_eq!(remaining, vec!["20240517100000_1.csv"]);
    assert_eq!(
        read_csv_ids(&ctx.table_directory("events").join(&remaining[0])),
        vec![3, 4]
    );

    let uploaded = ctx.transfer.keys_under(REMOTE_PREFIX).await;
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded[0].ends_with("20240517100000_0.csv"));
    assert!(uploaded[1].ends_with("20240517100000_2.csv"));
    assert_eq!(ctx.warehouse.row_count("events").await, Some(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_local_delete_does_not_stop_the_sweep() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.transfer.remove_uploaded_files().await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(
            &TableReplication::new("events").with_batch_size(2),
            run_time(0),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.files_written, 3);
    assert_eq!(result.stats.files_transferred, 3);
    assert_eq!(result.stats.files_not_deleted, 3);
    assert_eq!(result.stats.files_retained, 0);
    assert_eq!(ctx.transfer.keys_under(REMOTE_PREFIX).await.len(), 3);
    assert_eq!(ctx.warehouse.row_count("events").await, Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn next_run_sweeps_retained_files() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.transfer.fail_files_ending_with("_1.csv").await;
    let pipeline = ctx.pipeline();
    let table = TableReplication::new("events")
        .with_batch_size(2)
        .with_load_mode(LoadMode::Append);

    pipeline.run_at(&table, run_time(0)).await;
    ctx.transfer.clear_failures().await;
    let result = pipeline.run_at(&table, run_time(30)).await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.files_written, 3);
    assert_eq!(result.stats.files_transferred, 4);
    assert!(ctx.local_files("events").await.is_empty());
    assert_eq!(ctx.transfer.keys_under(REMOTE_PREFIX).await.len(), 6);
    assert_eq!(ctx.warehouse.row_count("events").await, Some(3 + 2 + 5));
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_extraction_splits_rows_into_files() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.source
        .add_table("events", common::events_columns(), common::events_rows(7))
        .await;
    ctx.source.add_undecodable_row("events").await;
    let pipeline = ctx.pipeline_with(ctx.settings(), false, false);

    let result = pipeline
        .run_at(
            &TableReplication::new("events").with_batch_size(3),
            run_time(0),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.rows_extracted, 7);
    assert_eq!(result.stats.rows_skipped, 1);

    // 8 source rows in batches of 3, the undecodable one is in the last batch.
    let files = ctx.local_files("events").await;
    assert_eq!(
        files,
        vec![
            "20240517100000_0.csv",
            "20240517100000_1.csv",
            "20240517100000_2.csv"
        ]
    );

    let ids: Vec<i64> = files
        .iter()
        .flat_map(|file| read_csv_ids(&ctx.table_directory("events").join(file)))
        .collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn uploads_of_one_run_share_the_date_partition() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let pipeline = ctx.pipeline();
    let started_at = Utc
        .with_ymd_and_hms(2024, 12, 31, 23, 59, 59)
        .single()
        .unwrap();

    let result = pipeline
        .run_at(
            &TableReplication::new("events").with_batch_size(1),
            started_at,
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    let keys = ctx.transfer.keys_under(REMOTE_PREFIX).await;
    assert_eq!(keys.len(), 5);
    assert!(
        keys.iter()
            .all(|key| key.contains("/events/year=2024/month=12/day=31/"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reruns_replace_rows_instead_of_adding_them() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let pipeline = ctx.pipeline();
    let orders = TableReplication::new("orders");

    pipeline.run_at(&orders, run_time(0)).await;
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));

    let result = pipeline.run_at(&orders, run_time(1)).await;
    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
    assert_eq!(ctx.transfer.keys_under(REMOTE_PREFIX).await.len(), 2);

    // A truncate forgets which staged files were loaded, so both files come back.
    ctx.warehouse.truncate_table("orders").await;
    let target = ctx.warehouse.target("orders");
    ctx.warehouse
        .load(&target, LoadMode::Replace)
        .await
        .unwrap();
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(6));

    let calls = ctx.warehouse.calls().await;
    assert!(calls.iter().any(|call| call == "load ORDERS replace"));
}

#[tokio::test(flavor = "multi_thread")]
async fn internal_stage_receives_files_directly() {
    init_test_tracing();
    let ctx = TestContext::internal(FileFormat::Csv).await;
    let pipeline = ctx.pipeline_with(ctx.settings(), false, true);

    let result = pipeline
        .run_at(
            &TableReplication::new("orders")
                .with_target_table_name("orders_copy")
                .with_view_name("orders_view"),
            run_time(0),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(
        ctx.warehouse.staged_files("orders_copy").await,
        vec!["20240517100000.csv"]
    );
    assert!(ctx.local_files("orders_copy").await.is_empty());
    assert_eq!(ctx.warehouse.row_count("orders_copy").await, Some(3));
    assert_eq!(
        ctx.warehouse.view_source("orders_view").await.as_deref(),
        Some("ORDERS_COPY")
    );

    let calls = ctx.warehouse.calls().await;
    assert_eq!(
        calls,
        vec![
            "create_stage ORDERS_COPY_STAGE",
            "direct_transfer 20240517100000.csv",
            "create_table ORDERS_COPY",
            "load ORDERS_COPY replace",
            "create_view ORDERS_VIEW",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn selected_fields_define_the_output_columns() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(
            &TableReplication::new("events").with_selected_fields(["kind", "id"]),
            run_time(0),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(ctx.warehouse.columns("events").await, vec!["kind", "id"]);
    assert_eq!(
        ctx.source.executed_queries().await[0].to_sql(),
        r#"SELECT "kind", "id" FROM "public"."events""#
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_table_runs_no_downstream_step() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    ctx.source
        .add_table("empty", common::orders_columns(), vec![])
        .await;
    let pipeline = ctx.pipeline();

    let bulk = pipeline
        .run_at(&TableReplication::new("empty"), run_time(0))
        .await;
    let batched = pipeline
        .run_at(&TableReplication::new("empty").with_batch_size(10), run_time(0))
        .await;

    assert!(bulk.is_completed());
    assert!(batched.is_completed());
    assert_eq!(bulk.stats.files_written + batched.stats.files_written, 0);
    assert!(!ctx.warehouse.has_stage("empty").await);
    assert!(!ctx.warehouse.table_exists("empty").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_failure_fails_the_table() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    ctx.source.fail_queries_for("orders").await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(&TableReplication::new("orders"), run_time(0))
        .await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(
        result.error.unwrap().kind(),
        ErrorKind::SourceQueryFailed
    );
    assert!(ctx.local_files("orders").await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn warehouse_failure_fails_the_table_before_transfer() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let pipeline = ctx.pipeline();
    let orders = TableReplication::new("orders");

    pipeline.run_at(&orders, run_time(0)).await;
    ctx.warehouse.fail_table("orders").await;
    let result = pipeline.run_at(&orders, run_time(1)).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(
        result.error.unwrap().kind(),
        ErrorKind::DestinationQueryFailed
    );
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
    assert_eq!(ctx.local_files("orders").await, vec!["20240517100001.parquet"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_is_loaded_when_every_transfer_fails() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    ctx.transfer.fail_files_ending_with(".parquet").await;
    let pipeline = ctx.pipeline();

    let result = pipeline
        .run_at(&TableReplication::new("orders"), run_time(0))
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.files_retained, 1);
    assert_eq!(ctx.local_files("orders").await.len(), 1);
    assert!(ctx.warehouse.has_stage("orders").await);
    assert!(!ctx.warehouse.table_exists("orders").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_options_control_the_sweep() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    let leftover = ctx.table_directory("orders").join("20240101000000.csv");
    tokio::fs::create_dir_all(leftover.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&leftover, "id|amount\n9|9.50\n")
        .await
        .unwrap();

    let mut settings = PipelineSettings::new(common::DATABASE, common::SCHEMA);
    settings.upload_remaining_files = false;
    settings.delete_after_transfer = false;
    let pipeline = ctx.pipeline_with(settings, true, false);

    let result = pipeline
        .run_at(&TableReplication::new("orders"), run_time(0))
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.stats.files_transferred, 1);
    assert_eq!(
        ctx.local_files("orders").await,
        vec!["20240101000000.csv", "20240517100000.csv"]
    );
    let keys = ctx.transfer.keys_under(REMOTE_PREFIX).await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("20240517100000.csv"));
}

#[tokio::test(flavor = "multi_thread")]
async fn object_storage_without_date_partitioning() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    let pipeline = etl::table_pipeline::TablePipeline::new(
        ctx.source.clone(),
        ctx.stager(),
        Some(ObjectStorage {
            transfer: ctx.transfer.clone(),
            layout: etl::transfer::RemoteLayout::new(""),
            date_partitioning: false,
        }),
        None::<etl::test_utils::MemoryWarehouse>,
        PipelineSettings::new(common::DATABASE, common::DATABASE),
    );

    let result = pipeline
        .run_at(&TableReplication::new("orders"), run_time(0))
        .await;

    assert!(result.is_completed(), "{:?}", result.error);
    // The schema level is left out when it is named like the database.
    assert_eq!(
        ctx.transfer.keys_under("").await,
        vec!["shop/orders/20240517100000.csv"]
    );
}
