use serde::Deserialize;
use std::path::PathBuf;

use crate::Config;
use crate::shared::ValidationError;

/// Configuration of the replicator process.
///
/// Loaded with [`crate::load_config`]; each file of [`ReplicatorConfig::replications_dir`] then
/// describes one source database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicatorConfig {
    /// Directory holding one YAML file per replicated database.
    pub replications_dir: PathBuf,
    /// Number of tables replicated concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_workers == 0 {
            return Err(ValidationError::InvalidMaxWorkers);
        }
        if self.replications_dir.as_os_str().is_empty() {
            return Err(ValidationError::EmptyField("replications_dir"));
        }

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_max_workers() -> usize {
    10
}
