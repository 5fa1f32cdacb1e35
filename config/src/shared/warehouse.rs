use serde::Deserialize;

use crate::SecretValue;
use crate::shared::{ValidationError, require_non_empty};

/// How files reach the warehouse stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Files are pushed into a warehouse-managed stage.
    Internal,
    /// The stage points at the object storage bucket the files are uploaded to.
    #[default]
    External,
}

/// Column matching used when copying staged files into a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMatching {
    #[default]
    CaseInsensitive,
    CaseSensitive,
}

/// Snowflake warehouse connection and load settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarehouseConfig {
    /// Account identifier, e.g. `myorg-myaccount`.
    pub account: String,
    pub user: String,
    /// Token sent as bearer credential to the SQL API.
    pub token: SecretValue,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Virtual warehouse executing the statements.
    #[serde(default)]
    pub warehouse: Option<String>,
    pub database: String,
    pub schema: String,
    #[serde(default)]
    pub stage_type: StageType,
    #[serde(default)]
    pub storage_integration: Option<String>,
    #[serde(default)]
    pub match_by_column_name: ColumnMatching,
    /// Fraction of rejected rows a load tolerates before failing.
    #[serde(default)]
    pub load_error_threshold: f64,
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.account, "warehouse.account")?;
        require_non_empty(&self.user, "warehouse.user")?;
        require_non_empty(&self.database, "warehouse.database")?;
        require_non_empty(&self.schema, "warehouse.schema")?;

        if !(0.0..=1.0).contains(&self.load_error_threshold) {
            return Err(ValidationError::InvalidLoadErrorThreshold(
                self.load_error_threshold,
            ));
        }

        if self.stage_type == StageType::External
            && self
                .storage_integration
                .as_deref()
                .is_none_or(|integration| integration.trim().is_empty())
        {
            return Err(ValidationError::MissingStorageIntegration);
        }

        Ok(())
    }
}

fn default_token_type() -> String {
    "OAUTH".to_string()
}

fn default_statement_timeout_secs() -> u64 {
    600
}
