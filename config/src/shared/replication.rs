use serde::Deserialize;
use std::collections::HashSet;

use crate::shared::extraction::default_true;
use crate::shared::{
    ExtractionConfig, ObjectStorageConfig, SourceConfig, StageType, TableConfig, ValidationError,
    WarehouseConfig,
};

/// Everything needed to replicate the tables of one source database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicationConfig {
    /// Disabled configs are loaded but never run.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: SourceConfig,
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub object_storage: Option<ObjectStorageConfig>,
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl ReplicationConfig {
    /// Validates the config as a whole, including the cross-section rules.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.extraction.validate()?;

        if let Some(object_storage) = &self.object_storage {
            object_storage.validate()?;
        }

        if let Some(warehouse) = &self.warehouse {
            warehouse.validate()?;

            if self.object_storage.is_none() {
                return Err(match warehouse.stage_type {
                    StageType::External => ValidationError::ExternalStageWithoutObjectStorage,
                    StageType::Internal => ValidationError::InternalStageWithoutObjectStorage,
                });
            }
        }

        let mut targets = HashSet::new();
        for table in &self.tables {
            table.validate(self.warehouse.is_some())?;

            let target = table.target_table_name().to_lowercase();
            if !targets.insert(target) {
                return Err(ValidationError::DuplicateTargetTable(
                    table.target_table_name().to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{ColumnMatching, FileFormat, IngestionMode, ObjectStorageProvider};
    use std::path::PathBuf;

    fn source() -> SourceConfig {
        SourceConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "sales".to_string(),
            schema: None,
            username: "replicator".to_string(),
            password: None,
            max_connections: None,
        }
    }

    fn warehouse(stage_type: StageType) -> WarehouseConfig {
        WarehouseConfig {
            account: "acme".to_string(),
            user: "loader".to_string(),
            token: "token".into(),
            token_type: "OAUTH".to_string(),
            role: None,
            warehouse: None,
            database: "raw".to_string(),
            schema: "sales".to_string(),
            stage_type,
            storage_integration: Some("s3_integration".to_string()),
            match_by_column_name: ColumnMatching::CaseInsensitive,
            load_error_threshold: 0.0,
            statement_timeout_secs: 60,
        }
    }

    fn table(name: &str) -> TableConfig {
        TableConfig {
            table_name: name.to_string(),
            target_table_name: None,
            fields: vec![],
            ingestion_mode: IngestionMode::FullLoad,
            incremental_column: None,
            where_clause: None,
            batch_size: None,
            replicate: true,
            view_name: None,
        }
    }

    fn config(tables: Vec<TableConfig>) -> ReplicationConfig {
        ReplicationConfig {
            enabled: true,
            source: source(),
            extraction: ExtractionConfig {
                local_directory: PathBuf::from("/tmp/replication"),
                file_format: FileFormat::Parquet,
                delete_after_transfer: true,
                upload_remaining_files: true,
            },
            object_storage: None,
            warehouse: None,
            tables,
        }
    }

    #[test]
    fn external_stage_requires_object_storage() {
        let mut config = config(vec![table("orders")]);
        config.warehouse = Some(warehouse(StageType::External));

        assert_eq!(
            config.validate(),
            Err(ValidationError::ExternalStageWithoutObjectStorage)
        );
    }

    #[test]
    fn internal_stage_requires_object_storage() {
        let mut config = config(vec![table("orders")]);
        config.warehouse = Some(warehouse(StageType::Internal));

        assert_eq!(
            config.validate(),
            Err(ValidationError::InternalStageWithoutObjectStorage)
        );

        config.object_storage = Some(ObjectStorageConfig {
            provider: ObjectStorageProvider::S3,
            bucket: "acme-raw".to_string(),
            region: None,
            endpoint: None,
            directory: "replication".to_string(),
            date_partitioning: false,
            access_key_id: None,
            secret_access_key: None,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn external_stage_requires_storage_integration() {
        let mut warehouse = warehouse(StageType::External);
        warehouse.storage_integration = None;

        assert_eq!(
            warehouse.validate(),
            Err(ValidationError::MissingStorageIntegration)
        );
    }

    #[test]
    fn incremental_tables_need_column_and_warehouse() {
        let mut events = table("events");
        events.ingestion_mode = IngestionMode::Incremental;
        assert_eq!(
            events.validate(true),
            Err(ValidationError::MissingIncrementalColumn("events".to_string()))
        );

        events.incremental_column = Some("created_at".to_string());
        assert_eq!(
            events.validate(false),
            Err(ValidationError::IncrementalWithoutWarehouse("events".to_string()))
        );
        assert!(events.validate(true).is_ok());
    }

    #[test]
    fn rejects_zero_batch_size_and_duplicate_targets() {
        let mut orders = table("orders");
        orders.batch_size = Some(0);
        assert_eq!(
            config(vec![orders]).validate(),
            Err(ValidationError::InvalidBatchSize("orders".to_string()))
        );

        let mut renamed = table("orders_v2");
        renamed.target_table_name = Some("ORDERS".to_string());
        assert_eq!(
            config(vec![table("orders"), renamed]).validate(),
            Err(ValidationError::DuplicateTargetTable("ORDERS".to_string()))
        );
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut warehouse = warehouse(StageType::Internal);
        warehouse.load_error_threshold = 1.5;

        assert_eq!(
            warehouse.validate(),
            Err(ValidationError::InvalidLoadErrorThreshold(1.5))
        );
    }

    #[test]
    fn empty_table_name_is_rejected() {
        assert_eq!(
            config(vec![table(" ")]).validate(),
            Err(ValidationError::EmptyField("tables.table_name"))
        );
    }
}
