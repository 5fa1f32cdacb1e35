use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required string field is empty.
    #[error("Invalid configuration: `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The worker pool would have no workers.
    #[error("Invalid configuration: `max_workers` must be greater than zero")]
    InvalidMaxWorkers,

    /// A table requests batches of zero rows.
    #[error("Invalid table `{0}`: `batch_size` must be greater than zero")]
    InvalidBatchSize(String),

    /// An incremental table has no watermark column.
    #[error("Invalid table `{0}`: `incremental_column` is required in incremental mode")]
    MissingIncrementalColumn(String),

    /// Incremental bounds are resolved against the warehouse, so one must be configured.
    #[error("Invalid table `{0}`: incremental mode requires a warehouse")]
    IncrementalWithoutWarehouse(String),

    /// Two tables of the same config load into the same target table.
    #[error("Duplicate target table `{0}`")]
    DuplicateTargetTable(String),

    /// External stages read from object storage, which is not configured.
    #[error("Invalid warehouse config: external stages require `object_storage`")]
    ExternalStageWithoutObjectStorage,

    /// Internal stages alone leave files stranded locally when pushing into the stage fails.
    #[error("Invalid warehouse config: internal stages require `object_storage` as a fallback")]
    InternalStageWithoutObjectStorage,

    /// External stages need a storage integration to authenticate against the bucket.
    #[error("Invalid warehouse config: external stages require `storage_integration`")]
    MissingStorageIntegration,

    /// The tolerated fraction of rejected rows is outside `[0, 1]`.
    #[error("Invalid warehouse config: `load_error_threshold` must be within [0, 1] (got {0})")]
    InvalidLoadErrorThreshold(f64),

    /// Only one half of a static credential pair is set.
    #[error("Invalid object storage config: `access_key_id` and `secret_access_key` must be set together")]
    IncompleteCredentials,

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub(crate) fn require_non_empty(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }

    Ok(())
}
