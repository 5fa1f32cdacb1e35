use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use etl_config::shared::ObjectStorageConfig;
use std::path::Path;
use tracing::{error, info};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::transfer::ObjectTransfer;

/// Uploads staged files to an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectTransfer {
    client: Client,
    bucket: String,
    url_scheme: &'static str,
}

impl S3ObjectTransfer {
    /// Builds the client from `config` and checks that the bucket is reachable.
    ///
    /// Static credentials are used when configured, the default AWS credential chain otherwise.
    pub async fn new(config: &ObjectStorageConfig) -> EtlResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_sdk_s3::config::Credentials::new(
                access_key_id.expose(),
                secret_access_key.expose(),
                None,
                None,
                "static",
            );
            loader = loader.credentials_provider(credentials);
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        let transfer = Self {
            client: Client::from_conf(s3_config.build()),
            bucket: config.bucket.clone(),
            url_scheme: config.provider.url_scheme(),
        };
        transfer.test_connection().await?;

        Ok(transfer)
    }

    async fn test_connection(&self) -> EtlResult<()> {
        info!(bucket = %self.bucket, "testing object storage connection");

        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "object storage connection successful");
                Ok(())
            }
            Err(err) => {
                error!(bucket = %self.bucket, error = %DisplayErrorContext(&err), "object storage connection failed");
                Err(etl_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "Object storage bucket is not reachable",
                    DisplayErrorContext(&err)
                ))
            }
        }
    }
}

impl ObjectTransfer for S3ObjectTransfer {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> EtlResult<()> {
        let body = ByteStream::from_path(local_path).await.map_err(|err| {
            etl_error!(
                ErrorKind::TransferFailed,
                "Failed to read staged file for upload",
                format!("{}: {err}", local_path.display())
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(remote_path)
            .body(body)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::TransferFailed,
                    "Object upload failed",
                    format!("s3://{}/{remote_path}: {}", self.bucket, DisplayErrorContext(&err))
                )
            })?;

        info!(bucket = %self.bucket, key = remote_path, "uploaded staged file");

        Ok(())
    }

    fn location_url(&self, remote_directory: &str) -> String {
        format!(
            "{}://{}/{}/",
            self.url_scheme,
            self.bucket,
            remote_directory.trim_matches('/')
        )
    }
}
