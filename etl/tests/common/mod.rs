//! Shared fixtures for the replication tests.
//!
//! Every test works against in-memory collaborators and a temporary staging directory.

#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use etl::stager::{CSV_DELIMITER, LocalStager};
use etl::table_pipeline::{ObjectStorage, PipelineSettings, TablePipeline};
use etl::test_utils::{MemoryObjectTransfer, MemorySourceReader, MemoryWarehouse};
use etl::transfer::RemoteLayout;
use etl::types::{Cell, ColumnSchema, TableRow, Type};
use etl_config::shared::FileFormat;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

pub const DATABASE: &str = "shop";
pub const SCHEMA: &str = "public";
pub const REMOTE_PREFIX: &str = "replication";

pub type MemoryPipeline = TablePipeline<MemorySourceReader, MemoryObjectTransfer, MemoryWarehouse>;

/// A timestamp on 2024-05-17, `second` seconds after 10:00:00.
pub fn run_time(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, second)
        .single()
        .unwrap()
}

pub fn orders_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("id", Type::INT4),
        ColumnSchema::new("amount", Type::NUMERIC),
    ]
}

pub fn orders_rows(count: i32) -> Vec<TableRow> {
    (1..=count)
        .map(|id| {
            TableRow::new(vec![
                Cell::I32(id),
                Cell::Numeric(BigDecimal::from_str(&format!("{id}.50")).unwrap()),
            ])
        })
        .collect()
}

pub fn events_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("id", Type::INT8),
        ColumnSchema::new("kind", Type::TEXT),
    ]
}

pub fn events_rows(count: i64) -> Vec<TableRow> {
    (1..=count)
        .map(|id| TableRow::new(vec![Cell::I64(id), Cell::String(format!("kind-{id}"))]))
        .collect()
}

/// In-memory collaborators sharing one staging directory.
pub struct TestContext {
    pub dir: TempDir,
    pub source: MemorySourceReader,
    pub transfer: MemoryObjectTransfer,
    pub warehouse: MemoryWarehouse,
    pub format: FileFormat,
}

impl TestContext {
    /// A context whose warehouse stages read from the in-memory object storage.
    pub async fn external(format: FileFormat) -> Self {
        let transfer = MemoryObjectTransfer::new();
        let warehouse = MemoryWarehouse::external("raw", SCHEMA, format, transfer.clone());

        Self::with(format, transfer, warehouse).await
    }

    /// A context whose warehouse receives files through direct transfers.
    pub async fn internal(format: FileFormat) -> Self {
        let warehouse = MemoryWarehouse::internal("raw", SCHEMA, format);

        Self::with(format, MemoryObjectTransfer::new(), warehouse).await
    }

    async fn with(
        format: FileFormat,
        transfer: MemoryObjectTransfer,
        warehouse: MemoryWarehouse,
    ) -> Self {
        let source = MemorySourceReader::new();
        source
            .add_table("orders", orders_columns(), orders_rows(3))
            .await;
        source
            .add_table("events", events_columns(), events_rows(5))
            .await;

        Self {
            dir: TempDir::new().unwrap(),
            source,
            transfer,
            warehouse,
            format,
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings::new(DATABASE, SCHEMA)
    }

    pub fn stager(&self) -> LocalStager {
        LocalStager::new(self.dir.path(), self.format)
    }

    pub fn object_storage(&self) -> ObjectStorage<MemoryObjectTransfer> {
        ObjectStorage {
            transfer: self.transfer.clone(),
            layout: RemoteLayout::new(REMOTE_PREFIX),
            date_partitioning: true,
        }
    }

    /// Pipeline uploading to object storage and loading into the warehouse.
    pub fn pipeline(&self) -> MemoryPipeline {
        self.pipeline_with(self.settings(), true, true)
    }

    pub fn pipeline_with(
        &self,
        settings: PipelineSettings,
        object_storage: bool,
        warehouse: bool,
    ) -> MemoryPipeline {
        TablePipeline::new(
            self.source.clone(),
            self.stager(),
            object_storage.then(|| self.object_storage()),
            warehouse.then(|| self.warehouse.clone()),
            settings,
        )
    }

    pub fn table_directory(&self, table: &str) -> PathBuf {
        self.dir.path().join(DATABASE).join(SCHEMA).join(table)
    }

    /// Names of the staged files left in the local directory of `table`.
    pub async fn local_files(&self, table: &str) -> Vec<String> {
        self.stager()
            .list_files(&self.table_directory(table))
            .await
            .unwrap()
    }
}

/// Reads the `id` column of a staged CSV file.
pub fn read_csv_ids(path: &Path) -> Vec<i64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_path(path)
        .unwrap();

    reader
        .records()
        .map(|record| record.unwrap()[0].parse().unwrap())
        .collect()
}
