//! In-memory collaborators for exercising pipelines without Postgres, S3 or Snowflake.
//!
//! The fakes are cheap to clone and share their state between clones, so a test keeps a handle
//! to inspect what a pipeline did or to inject failures while it runs.

mod memory_source;
mod memory_transfer;
mod memory_warehouse;
mod recording_executor;

pub use memory_source::MemorySourceReader;
pub use memory_transfer::MemoryObjectTransfer;
pub use memory_warehouse::MemoryWarehouse;
pub use recording_executor::RecordingSqlExecutor;
