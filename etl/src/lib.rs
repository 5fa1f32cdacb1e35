//! Batch replication of Postgres tables into object storage and a Snowflake warehouse.
//!
//! Each table is extracted into local CSV or Parquet files, the files are transferred to S3
//! and/or a warehouse stage, and the warehouse table is reloaded from its stage. Tables run in
//! parallel on a bounded worker pool and fail independently of each other.

pub mod concurrency;
pub mod conversions;
pub mod error;
mod macros;
pub mod metrics;
pub mod orchestrator;
pub mod planning;
pub mod source;
pub mod stager;
pub mod table_pipeline;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfer;
pub mod types;
pub mod warehouse;
