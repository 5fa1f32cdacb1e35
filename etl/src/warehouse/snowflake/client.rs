use etl_config::shared::WarehouseConfig;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;

/// Delay between two polls of a statement that is still running.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Snowflake returns this SQLSTATE when a referenced object does not exist.
const SQLSTATE_OBJECT_NOT_FOUND: &str = "42S02";

/// Rows returned by a statement, every value in its text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Position of the column `name`, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// Sums an integer column over every row, rows where it is missing count as zero.
    pub fn sum(&self, column: &str) -> u64 {
        (0..self.rows.len())
            .filter_map(|row| self.value(row, column))
            .filter_map(|value| value.parse::<u64>().ok())
            .sum()
    }
}

/// Runs SQL statements against the warehouse.
pub trait SqlExecutor {
    fn execute(&self, statement: &str) -> impl Future<Output = EtlResult<QueryResult>> + Send;
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
}

/// A Snowflake connection over the SQL API.
///
/// Statements are submitted with the configured token. Statements still running after the
/// synchronous window are polled until they finish. Results spanning several partitions are
/// fetched in full.
///
/// The SQL API cannot upload local files, so `PUT` statements are rejected by Snowflake.
#[derive(Debug, Clone)]
pub struct SnowflakeSqlClient {
    client: Client,
    base_url: String,
    token: Secret<String>,
    token_type: String,
    database: String,
    schema: String,
    warehouse: Option<String>,
    role: Option<String>,
    statement_timeout_secs: u64,
}

impl SnowflakeSqlClient {
    pub fn new(config: &WarehouseConfig) -> Self {
        Self::with_base_url(
            config,
            format!("https://{}.snowflakecomputing.com", config.account),
        )
    }

    /// Creates a client sending its requests to `base_url` instead of the account URL.
    pub fn with_base_url(config: &WarehouseConfig, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Secret::new(config.token.expose().to_string()),
            token_type: config.token_type.clone(),
            database: config.database.to_uppercase(),
            schema: config.schema.to_uppercase(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            statement_timeout_secs: config.statement_timeout_secs,
        }
    }

    /// Runs `SELECT 1` to check the account URL and the token.
    pub async fn test_connection(&self) -> EtlResult<()> {
        self.execute("SELECT 1").await?;
        info!(base_url = %self.base_url, "warehouse connection is healthy");

        Ok(())
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.token.expose_secret())
            .header("X-Snowflake-Authorization-Token-Type", &self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "replicator/0.1")
    }

    async fn submit(&self, statement: &str) -> EtlResult<StatementResponse> {
        let body = StatementRequest {
            statement,
            timeout: self.statement_timeout_secs,
            // The namespace may not exist yet while it is being created.
            database: &self.database,
            schema: &self.schema,
            warehouse: self.warehouse.as_deref(),
            role: self.role.as_deref(),
        };

        let url = format!("{}/api/v2/statements", self.base_url);
        let response = self
            .request(self.client.post(&url))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .json(&body)
            .send()
            .await?;

        let mut response = Self::parse(response).await?;
        while let Some(PendingStatement(handle)) = response.pending {
            tokio::time::sleep(POLL_INTERVAL).await;
            debug!(handle = %handle, "polling running statement");
            response = Self::parse(self.fetch(&handle, None).await?).await?;
        }

        Ok(response.body)
    }

    async fn fetch(&self, handle: &str, partition: Option<usize>) -> EtlResult<reqwest::Response> {
        let url = format!("{}/api/v2/statements/{handle}", self.base_url);
        let mut builder = self.request(self.client.get(&url));
        if let Some(partition) = partition {
            builder = builder.query(&[("partition", partition)]);
        }

        Ok(builder.send().await?)
    }

    async fn parse(response: reqwest::Response) -> EtlResult<ParsedResponse> {
        let status = response.status();
        match status {
            StatusCode::OK => Ok(ParsedResponse {
                body: response.json().await?,
                pending: None,
            }),
            StatusCode::ACCEPTED => {
                let body: StatementResponse = response.json().await?;
                let Some(handle) = body.statement_handle.clone() else {
                    bail!(
                        ErrorKind::DestinationQueryFailed,
                        "Running statement has no handle"
                    );
                };

                Ok(ParsedResponse {
                    body,
                    pending: Some(PendingStatement(handle)),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let text = response.text().await?;
                Err(etl_error!(
                    ErrorKind::AuthenticationError,
                    "Warehouse rejected the credentials",
                    format!("{status}: {text}")
                ))
            }
            _ => {
                let text = response.text().await?;
                Err(statement_error(status, &text))
            }
        }
    }
}

struct PendingStatement(String);

struct ParsedResponse {
    body: StatementResponse,
    pending: Option<PendingStatement>,
}

fn statement_error(status: StatusCode, text: &str) -> EtlError {
    let Ok(error) = serde_json::from_str::<ErrorResponse>(text) else {
        return etl_error!(
            ErrorKind::DestinationQueryFailed,
            "Warehouse statement failed",
            format!("{status}: {text}")
        );
    };

    let detail = format!(
        "{status} code={} sqlState={}: {}",
        error.code.as_deref().unwrap_or("-"),
        error.sql_state.as_deref().unwrap_or("-"),
        error.message.as_deref().unwrap_or("no message")
    );

    if error.sql_state.as_deref() == Some(SQLSTATE_OBJECT_NOT_FOUND) {
        etl_error!(
            ErrorKind::DestinationObjectNotFound,
            "Warehouse object does not exist",
            detail
        )
    } else {
        etl_error!(
            ErrorKind::DestinationQueryFailed,
            "Warehouse statement failed",
            detail
        )
    }
}

impl SqlExecutor for SnowflakeSqlClient {
    async fn execute(&self, statement: &str) -> EtlResult<QueryResult> {
        debug!(statement, "executing warehouse statement");

        let response = self.submit(statement).await?;
        let (columns, partitions) = match response.result_set_meta_data {
            Some(meta) => (
                meta.row_type.into_iter().map(|row| row.name).collect(),
                meta.partition_info.len(),
            ),
            None => (vec![], 0),
        };

        let mut rows = response.data;
        if partitions > 1 {
            let Some(handle) = response.statement_handle else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Partitioned result has no statement handle"
                );
            };

            for partition in 1..partitions {
                let page = Self::parse(self.fetch(&handle, Some(partition)).await?).await?;
                rows.extend(page.body.data);
            }
        }

        Ok(QueryResult { columns, rows })
    }
}
