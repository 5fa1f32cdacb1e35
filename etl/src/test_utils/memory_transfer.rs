use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::transfer::ObjectTransfer;

const MEMORY_BUCKET: &str = "memory-bucket";

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    attempts: usize,
    failing_attempts: HashSet<usize>,
    failing_suffixes: Vec<String>,
    remove_uploaded_files: bool,
}

/// An [`ObjectTransfer`] keeping uploaded objects in memory.
///
/// Failures can be injected for a given upload attempt or for every file whose name ends with a
/// suffix.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectTransfer {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the upload attempt with the zero based index `attempt`, counted across all files.
    pub async fn fail_attempt(&self, attempt: usize) {
        let mut inner = self.inner.lock().await;
        inner.failing_attempts.insert(attempt);
    }

    /// Fails every upload of a file whose name ends with `suffix`.
    pub async fn fail_files_ending_with(&self, suffix: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_suffixes.push(suffix.to_string());
    }

    /// Removes each local file right after uploading it, as a concurrent cleanup would.
    pub async fn remove_uploaded_files(&self) {
        let mut inner = self.inner.lock().await;
        inner.remove_uploaded_files = true;
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.failing_attempts.clear();
        inner.failing_suffixes.clear();
    }

    pub async fn upload_attempts(&self) -> usize {
        self.inner.lock().await.attempts
    }

    /// Keys of the stored objects starting with `prefix`, in key order.
    pub async fn keys_under(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Objects stored below a location returned by [`ObjectTransfer::location_url`].
    pub async fn objects_at(&self, location_url: &str) -> Vec<(String, Vec<u8>)> {
        let Some(directory) = location_url.strip_prefix(&format!("memory://{MEMORY_BUCKET}/"))
        else {
            return vec![];
        };

        let inner = self.inner.lock().await;
        inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(directory))
            .map(|(key, bytes)| (key.clone(), bytes.clone()))
            .collect()
    }
}

impl ObjectTransfer for MemoryObjectTransfer {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let attempt = inner.attempts;
        inner.attempts += 1;

        let injected = inner.failing_attempts.contains(&attempt)
            || inner
                .failing_suffixes
                .iter()
                .any(|suffix| remote_path.ends_with(suffix.as_str()));
        if injected {
            bail!(
                ErrorKind::TransferFailed,
                "Object upload failed",
                format!("injected failure for {remote_path}")
            );
        }

        let bytes = tokio::fs::read(local_path).await?;
        info!(key = remote_path, bytes = bytes.len(), "stored object in memory");
        inner.objects.insert(remote_path.to_string(), bytes);
        if inner.remove_uploaded_files {
            tokio::fs::remove_file(local_path).await?;
        }

        Ok(())
    }

    fn location_url(&self, remote_directory: &str) -> String {
        format!(
            "memory://{MEMORY_BUCKET}/{}/",
            remote_directory.trim_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_objects_and_injects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_0.csv");
        std::fs::write(&path, "id\n1\n").unwrap();

        let transfer = MemoryObjectTransfer::new();
        transfer.fail_attempt(1).await;
        transfer.fail_files_ending_with("_9.csv").await;

        transfer.upload(&path, "sales/orders/a_0.csv").await.unwrap();
        assert!(transfer.upload(&path, "sales/orders/a_1.csv").await.is_err());
        assert!(transfer.upload(&path, "sales/orders/a_9.csv").await.is_err());
        transfer.upload(&path, "sales/events/a_0.csv").await.unwrap();

        assert_eq!(transfer.upload_attempts().await, 4);
        assert_eq!(
            transfer.keys_under("sales/orders").await,
            vec!["sales/orders/a_0.csv"]
        );

        let url = transfer.location_url("sales/orders");
        assert_eq!(url, "memory://memory-bucket/sales/orders/");
        let objects = transfer.objects_at(&url).await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].1, b"id\n1\n");
    }
}
