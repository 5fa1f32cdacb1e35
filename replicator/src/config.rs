use anyhow::Context;
use etl_config::shared::ReplicatorConfig;
use etl_config::{LoadedReplicationConfig, load_config, load_replication_configs};

/// Loads the [`ReplicatorConfig`] and validates it.
pub fn load_replicator_config() -> anyhow::Result<ReplicatorConfig> {
    let config = load_config::<ReplicatorConfig>()?;
    config.validate()?;

    Ok(config)
}

/// Loads and validates every replication config of the replicator's config directory.
///
/// A single invalid file fails the whole run before anything is replicated.
pub fn load_replications(config: &ReplicatorConfig) -> anyhow::Result<Vec<LoadedReplicationConfig>> {
    let replications = load_replication_configs(&config.replications_dir).with_context(|| {
        format!(
            "failed to load replication configs from {}",
            config.replications_dir.display()
        )
    })?;

    for replication in &replications {
        replication
            .config
            .validate()
            .with_context(|| format!("invalid replication config {}", replication.path.display()))?;
    }

    Ok(replications)
}
