mod common;

use etl::concurrency::shutdown::create_shutdown_channel;
use etl::error::ErrorKind;
use etl::orchestrator::ReplicationOrchestrator;
use etl::planning::plan_tables;
use etl::types::TableReplication;
use etl_config::shared::{FileFormat, IngestionMode, TableConfig};
use etl_telemetry::init_test_tracing;

use crate::common::{REMOTE_PREFIX, SCHEMA, TestContext};

fn tables() -> Vec<TableReplication> {
    vec![
        TableReplication::new("orders"),
        TableReplication::new("events").with_batch_size(2),
        TableReplication::new("broken"),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_table_does_not_stop_the_others() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    ctx.source
        .add_table("broken", common::orders_columns(), common::orders_rows(1))
        .await;
    ctx.source.fail_queries_for("broken").await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 2);

    let report = orchestrator.start(tables()).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.completed().count(), 2);
    let broken = report.result("public.broken").unwrap();
    assert_eq!(
        broken.error.as_ref().unwrap().kind(),
        ErrorKind::SourceQueryFailed
    );
    assert!(report.result("public.orders").unwrap().is_completed());
    assert!(report.result("public.events").unwrap().is_completed());

    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
    assert_eq!(ctx.warehouse.row_count("events").await, Some(5));
    assert_eq!(ctx.warehouse.namespace_setups().await, 1);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::SourceQueryFailed]);
}

#[tokio::test(flavor = "multi_thread")]
async fn warehouse_failure_is_isolated() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.warehouse.fail_table("events").await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 1);

    let report = orchestrator
        .start(vec![
            TableReplication::new("events"),
            TableReplication::new("orders"),
        ])
        .await
        .unwrap();

    assert!(report.has_failures());
    assert!(!report.result("public.events").unwrap().is_completed());
    assert!(report.result("public.orders").unwrap().is_completed());
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_tables_are_never_dispatched() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 4);

    let report = orchestrator
        .start(vec![
            TableReplication::new("orders"),
            TableReplication::new("events").with_replicate(false),
        ])
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.skipped, vec!["public.events"]);
    assert!(
        ctx.source
            .executed_queries()
            .await
            .iter()
            .all(|query| query.table != "events")
    );
    assert!(ctx.local_files("events").await.is_empty());
    assert!(!ctx.warehouse.has_stage("events").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_tables_not_yet_dispatched() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    shutdown_tx.shutdown().unwrap();
    let orchestrator =
        ReplicationOrchestrator::new(ctx.pipeline(), 2).with_shutdown(shutdown_rx);

    let report = orchestrator
        .start(vec![
            TableReplication::new("orders"),
            TableReplication::new("events"),
        ])
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|result| {
        result.error.as_ref().map(|err| err.kind()) == Some(ErrorKind::PipelineCancelled)
    }));
    assert!(ctx.source.executed_queries().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_workers_is_rejected() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Parquet).await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 0);

    let err = orchestrator.start(tables()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(ctx.warehouse.namespace_setups().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn planned_incremental_run_appends_new_rows() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 2);
    let configs = vec![
        TableConfig {
            table_name: "events".to_string(),
            target_table_name: None,
            fields: vec![],
            ingestion_mode: IngestionMode::Incremental,
            incremental_column: Some("id".to_string()),
            where_clause: None,
            batch_size: Some(2),
            replicate: true,
            view_name: None,
        },
        TableConfig {
            table_name: "missing".to_string(),
            target_table_name: None,
            fields: vec![],
            ingestion_mode: IngestionMode::FullLoad,
            incremental_column: None,
            where_clause: None,
            batch_size: None,
            replicate: true,
            view_name: None,
        },
    ];

    let plan = plan_tables(&ctx.source, Some(&ctx.warehouse), SCHEMA, &configs)
        .await
        .unwrap();
    assert_eq!(plan.skipped, vec!["missing"]);
    assert_eq!(plan.tables[0].filter_clause, None);
    let report = orchestrator.start(plan.tables).await.unwrap();
    assert!(!report.has_failures());
    assert_eq!(ctx.warehouse.row_count("events").await, Some(5));

    ctx.warehouse.set_max_value("events", "id", "5").await;
    let plan = plan_tables(&ctx.source, Some(&ctx.warehouse), SCHEMA, &configs)
        .await
        .unwrap();
    assert_eq!(
        plan.tables[0].filter_clause.as_deref(),
        Some(r#""id" > '5'"#)
    );

    // The in-memory source ignores filters, so every row is appended again.
    let result = ctx
        .pipeline()
        .run_at(&plan.tables[0], common::run_time(0))
        .await;
    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(ctx.warehouse.row_count("events").await, Some(10));
    assert_eq!(ctx.warehouse.namespace_setups().await, 1);
    assert!(!ctx.transfer.keys_under(REMOTE_PREFIX).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unplannable_table_is_reported_next_to_replicated_ones() {
    init_test_tracing();
    let ctx = TestContext::external(FileFormat::Csv).await;
    ctx.warehouse.fail_table("events").await;
    let orchestrator = ReplicationOrchestrator::new(ctx.pipeline(), 2);
    let configs = vec![
        TableConfig {
            table_name: "events".to_string(),
            target_table_name: None,
            fields: vec![],
            ingestion_mode: IngestionMode::Incremental,
            incremental_column: Some("id".to_string()),
            where_clause: None,
            batch_size: None,
            replicate: true,
            view_name: None,
        },
        TableConfig {
            table_name: "orders".to_string(),
            target_table_name: None,
            fields: vec![],
            ingestion_mode: IngestionMode::FullLoad,
            incremental_column: None,
            where_clause: None,
            batch_size: None,
            replicate: true,
            view_name: None,
        },
    ];

    let plan = plan_tables(&ctx.source, Some(&ctx.warehouse), SCHEMA, &configs)
        .await
        .unwrap();
    assert_eq!(plan.tables, vec![TableReplication::new("orders")]);

    let mut report = orchestrator.start(plan.tables).await.unwrap();
    report.results.extend(plan.failed);

    assert!(report.result("public.orders").unwrap().is_completed());
    assert_eq!(ctx.warehouse.row_count("orders").await, Some(3));
    let events = report.result("public.events").unwrap();
    assert_eq!(
        events.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::DestinationQueryFailed)
    );
    assert!(
        ctx.source
            .executed_queries()
            .await
            .iter()
            .all(|query| query.table != "events")
    );
    assert_eq!(
        report.into_result().unwrap_err().kinds(),
        vec![ErrorKind::DestinationQueryFailed]
    );
}
