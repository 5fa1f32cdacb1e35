//! Common types used throughout the replication engine.

mod replication;
mod report;

pub use replication::*;
pub use report::*;

pub use crate::conversions::{Cell, table_row::TableRow};
pub use tokio_postgres::types::Type;

/// Name and Postgres type of one extracted column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: Type,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}
