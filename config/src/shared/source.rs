use serde::Deserialize;

use crate::SecretValue;
use crate::shared::{ValidationError, require_non_empty};

/// Schema used when a source config does not name one.
pub const DEFAULT_SOURCE_SCHEMA: &str = "public";

/// Configuration for connecting to the Postgres source database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the Postgres database to replicate.
    pub name: String,
    /// Schema the replicated tables live in.
    #[serde(default)]
    pub schema: Option<String>,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user, redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretValue>,
    /// Size of the connection pool shared by all table pipelines.
    ///
    /// Defaults to the number of workers when absent.
    #[serde(default)]
    pub max_connections: Option<usize>,
}

impl SourceConfig {
    /// Returns the configured schema or [`DEFAULT_SOURCE_SCHEMA`].
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SOURCE_SCHEMA)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.host, "source.host")?;
        require_non_empty(&self.name, "source.name")?;
        require_non_empty(&self.username, "source.username")?;
        if let Some(schema) = &self.schema {
            require_non_empty(schema, "source.schema")?;
        }
        if self.max_connections == Some(0) {
            return Err(ValidationError::InvalidConfig(
                "`source.max_connections` must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_port() -> u16 {
    5432
}
