use serde::Deserialize;

use crate::SecretValue;
use crate::shared::extraction::default_true;
use crate::shared::{ValidationError, require_non_empty};

/// Object storage providers files can be uploaded to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStorageProvider {
    #[default]
    S3,
}

impl ObjectStorageProvider {
    /// URL scheme of the provider, as used in warehouse stage locations.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            ObjectStorageProvider::S3 => "s3",
        }
    }
}

/// Object storage bucket receiving the staged files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectStorageConfig {
    #[serde(default)]
    pub provider: ObjectStorageProvider,
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix under which the staging tree is mirrored.
    #[serde(default)]
    pub directory: String,
    /// Append `year=/month=/day=` segments to remote paths.
    #[serde(default = "default_true")]
    pub date_partitioning: bool,
    /// Static credentials. The default credential chain is used when absent.
    #[serde(default)]
    pub access_key_id: Option<SecretValue>,
    #[serde(default)]
    pub secret_access_key: Option<SecretValue>,
}

impl ObjectStorageConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.bucket, "object_storage.bucket")?;
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ValidationError::IncompleteCredentials);
        }

        Ok(())
    }
}
