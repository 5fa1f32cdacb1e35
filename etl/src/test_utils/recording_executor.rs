use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::warehouse::snowflake::{QueryResult, SqlExecutor};

#[derive(Debug, Default)]
struct Inner {
    statements: Vec<String>,
    responses: Vec<(String, QueryResult)>,
    failures: Vec<(String, ErrorKind)>,
}

/// A [`SqlExecutor`] recording every statement instead of running it.
///
/// Statements return an empty result unless a canned result or a failure was registered for a
/// prefix of the statement. The most recent registration wins.
#[derive(Debug, Clone, Default)]
pub struct RecordingSqlExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingSqlExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond_to(&self, prefix: &str, result: QueryResult) {
        let mut inner = self.inner.lock().await;
        inner.responses.push((prefix.to_string(), result));
    }

    pub async fn fail_statements_starting_with(&self, prefix: &str, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.failures.push((prefix.to_string(), kind));
    }

    pub async fn clear_failures(&self) {
        self.inner.lock().await.failures.clear();
    }

    /// Every executed statement in execution order, failed ones included.
    pub async fn statements(&self) -> Vec<String> {
        self.inner.lock().await.statements.clone()
    }
}

impl SqlExecutor for RecordingSqlExecutor {
    async fn execute(&self, statement: &str) -> EtlResult<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner.statements.push(statement.to_string());

        if let Some((_, kind)) = inner
            .failures
            .iter()
            .rev()
            .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
        {
            return Err(etl_error!(
                *kind,
                "Injected statement failure",
                statement
            ));
        }

        let result = inner
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default();

        Ok(result)
    }
}
