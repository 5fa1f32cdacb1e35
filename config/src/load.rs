use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::environment::Environment;
use crate::shared::ReplicationConfig;

/// Directory containing configuration files relative to application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_MAX_WORKERS=4` sets the `max_workers` field.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Extensions recognized as replication config files.
const REPLICATION_FILE_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Trait defining the list of keys that should be parsed as lists in a given [`Config`]
/// implementation.
pub trait Config {
    /// Keys parsed as `,`-separated lists when read from environment variables.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads hierarchical configuration from YAML files and environment variables.
///
/// Loads configuration in this order:
/// 1. Base configuration from `configuration/base.yaml`
/// 2. Environment-specific file from `configuration/{environment}.yaml`
/// 3. Environment variable overrides prefixed with `APP`
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path =
        std::env::current_dir().map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;
    let configuration_directory = base_path.join(CONFIGURATION_DIR);

    let environment =
        Environment::load().map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}

/// One replication config file together with the path it was read from.
#[derive(Debug, Clone)]
pub struct LoadedReplicationConfig {
    pub path: PathBuf,
    pub config: ReplicationConfig,
}

/// Reads every YAML file of `directory` as a [`ReplicationConfig`].
///
/// Files are returned sorted by path so runs process databases in a stable order. Files with other
/// extensions are ignored. Validation is left to the caller.
pub fn load_replication_configs(
    directory: &Path,
) -> Result<Vec<LoadedReplicationConfig>, config::ConfigError> {
    let entries =
        std::fs::read_dir(directory).map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| config::ConfigError::Foreign(Box::new(err)))?
            .path();

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| REPLICATION_FILE_EXTENSIONS.contains(&ext));
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let config = load_replication_config(&path)?;
            Ok(LoadedReplicationConfig { path, config })
        })
        .collect()
}

/// Reads a single replication config file.
pub fn load_replication_config(path: &Path) -> Result<ReplicationConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path))
        .build()?
        .try_deserialize::<ReplicationConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{FileFormat, IngestionMode, StageType};

    const SALES_CONFIG: &str = r#"
source:
  host: localhost
  port: 5432
  name: sales
  username: replicator
  password: secret
extraction:
  local_directory: /tmp/replication
  file_format: csv
object_storage:
  bucket: acme-raw
warehouse:
  account: acme-xy12345
  user: loader
  token: token
  database: raw
  schema: sales
  stage_type: internal
tables:
  - table_name: orders
  - table_name: events
    batch_size: 1000
    ingestion_mode: incremental
    incremental_column: created_at
    where: "kind <> 'noise'"
  - table_name: audit
    replicate: false
"#;

    #[test]
    fn loads_yaml_files_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_sales.yaml"), SALES_CONFIG).unwrap();
        std::fs::write(dir.path().join("a_sales.yml"), SALES_CONFIG).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a config").unwrap();

        let loaded = load_replication_configs(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].path.ends_with("a_sales.yml"));
        assert!(loaded[1].path.ends_with("b_sales.yaml"));
    }

    #[test]
    fn applies_documented_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.yaml");
        std::fs::write(&path, SALES_CONFIG).unwrap();

        let config = load_replication_config(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.source.schema(), "public");
        assert_eq!(config.extraction.file_format, FileFormat::Csv);
        assert!(config.extraction.delete_after_transfer);
        assert!(config.extraction.upload_remaining_files);

        let object_storage = config.object_storage.as_ref().unwrap();
        assert_eq!(object_storage.directory, "");
        assert!(object_storage.date_partitioning);

        let warehouse = config.warehouse.as_ref().unwrap();
        assert_eq!(warehouse.stage_type, StageType::Internal);
        assert_eq!(warehouse.load_error_threshold, 0.0);

        let orders = &config.tables[0];
        assert_eq!(orders.target_table_name(), "orders");
        assert_eq!(orders.ingestion_mode, IngestionMode::FullLoad);
        assert!(orders.replicate);
        assert!(orders.batch_size.is_none());

        let events = &config.tables[1];
        assert_eq!(events.ingestion_mode, IngestionMode::Incremental);
        assert_eq!(events.incremental_column.as_deref(), Some("created_at"));
        assert_eq!(events.where_clause.as_deref(), Some("kind <> 'noise'"));
        assert_eq!(events.batch_size, Some(1000));

        assert!(!config.tables[2].replicate);
        config.validate().unwrap();
    }
}
