use std::fmt;

use crate::error::{EtlError, EtlResult};

/// Terminal state of a table pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters collected while replicating one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRunStats {
    pub rows_extracted: u64,
    pub rows_skipped: u64,
    pub files_written: usize,
    pub files_transferred: usize,
    /// Files left in the local directory for the next run to pick up.
    pub files_retained: usize,
    /// Transferred files that could not be removed from the local directory.
    pub files_not_deleted: usize,
    pub rows_loaded: u64,
}

/// Outcome of one table pipeline invocation.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub table_identity: String,
    pub status: TaskStatus,
    pub error: Option<EtlError>,
    pub stats: TableRunStats,
}

impl TaskResult {
    pub fn completed(table_identity: impl Into<String>, stats: TableRunStats) -> Self {
        Self {
            table_identity: table_identity.into(),
            status: TaskStatus::Completed,
            error: None,
            stats,
        }
    }

    pub fn failed(table_identity: impl Into<String>, error: EtlError, stats: TableRunStats) -> Self {
        Self {
            table_identity: table_identity.into(),
            status: TaskStatus::Failed,
            error: Some(error),
            stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Results of every table dispatched by one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    /// One entry per dispatched or cancelled table, in completion order.
    pub results: Vec<TaskResult>,
    /// Tables that were not dispatched because replication is disabled for them.
    pub skipped: Vec<String>,
}

impl ReplicationReport {
    pub fn completed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|result| result.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|result| !result.is_completed())
    }

    pub fn result(&self, table_identity: &str) -> Option<&TaskResult> {
        self.results
            .iter()
            .find(|result| result.table_identity == table_identity)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Converts the report into a run-level result, aggregating the errors of failed tables.
    pub fn into_result(self) -> EtlResult<()> {
        let errors: Vec<EtlError> = self
            .results
            .into_iter()
            .filter_map(|result| result.error)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EtlError::many(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::etl_error;

    #[test]
    fn report_aggregates_failed_tables() {
        let report = ReplicationReport {
            results: vec![
                TaskResult::completed("sales.orders", TableRunStats::default()),
                TaskResult::failed(
                    "sales.events",
                    etl_error!(ErrorKind::SourceQueryFailed, "Extraction query failed"),
                    TableRunStats::default(),
                ),
                TaskResult::failed(
                    "sales.audit",
                    etl_error!(ErrorKind::PipelineCancelled, "Run was shut down"),
                    TableRunStats::default(),
                ),
            ],
            skipped: vec![],
        };

        assert!(report.has_failures());
        assert_eq!(report.completed().count(), 1);
        assert_eq!(
            report.result("sales.events").map(|result| result.status),
            Some(TaskStatus::Failed)
        );

        let err = report.into_result().unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SourceQueryFailed, ErrorKind::PipelineCancelled]
        );
    }

    #[test]
    fn empty_report_is_success() {
        let report = ReplicationReport::default();
        assert!(!report.has_failures());
        assert!(report.into_result().is_ok());
    }
}
