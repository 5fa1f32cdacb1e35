//! Moving staged files to object storage.

use chrono::{DateTime, Datelike, Utc};
use std::fmt;
use std::future::Future;
use std::path::Path;

use crate::error::EtlResult;
use crate::stager::TableLayout;

mod s3;

pub use s3::S3ObjectTransfer;

/// Uploads local files to an object store.
pub trait ObjectTransfer {
    /// Uploads the file at `local_path` under the object key `remote_path`.
    fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// URL of a remote directory in the form external warehouse stages expect.
    fn location_url(&self, remote_directory: &str) -> String;
}

/// The `year=YYYY/month=M/day=D` segment appended to remote paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePartition {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DatePartition {
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
        }
    }
}

impl fmt::Display for DatePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "year={:04}/month={}/day={}",
            self.year, self.month, self.day
        )
    }
}

/// Mirrors the local staging tree under an optional key prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteLayout {
    prefix: String,
}

impl RemoteLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// `<prefix>/<database>/[<schema>/]<table>`
    pub fn table_directory(&self, layout: &TableLayout) -> String {
        let mut segments = Vec::with_capacity(4);
        if !self.prefix.is_empty() {
            segments.push(self.prefix.as_str());
        }
        segments.extend(layout.segments());

        segments.join("/")
    }

    /// `<table directory>/[year=YYYY/month=M/day=D/]<file_name>`
    pub fn object_path(
        &self,
        layout: &TableLayout,
        partition: Option<&DatePartition>,
        file_name: &str,
    ) -> String {
        match partition {
            Some(partition) => format!(
                "{}/{partition}/{file_name}",
                self.table_directory(layout)
            ),
            None => format!("{}/{file_name}", self.table_directory(layout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_date_partition_without_padding() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(
            DatePartition::from_timestamp(timestamp).to_string(),
            "year=2024/month=3/day=9"
        );
    }

    #[test]
    fn builds_object_paths() {
        let layout = TableLayout::new("sales", "public", "orders");
        let partition = DatePartition {
            year: 2024,
            month: 12,
            day: 1,
        };

        let remote = RemoteLayout::new("/replication/");
        assert_eq!(
            remote.table_directory(&layout),
            "replication/sales/public/orders"
        );
        assert_eq!(
            remote.object_path(&layout, Some(&partition), "20241201000000.parquet"),
            "replication/sales/public/orders/year=2024/month=12/day=1/20241201000000.parquet"
        );

        let remote = RemoteLayout::new("");
        assert_eq!(
            remote.object_path(&TableLayout::new("sales", "sales", "orders"), None, "a.csv"),
            "sales/orders/a.csv"
        );
    }
}
