use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use growbot_core::collaborators::BlobStorage;
use growbot_core::errors::StorageError;

/// Blob storage backed by one file per key under a root directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are flat names; anything that could escape the root is rejected.
    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        valid.then(|| self.root.join(key))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStore {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_string(),
            reason,
        };
        let path = self.path_for(key).ok_or_else(|| write_err("invalid key".into()))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        debug!(path = %path.display(), "blob written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let delete_err = |reason: String| StorageError::Delete {
            key: key.to_string(),
            reason,
        };
        let path = self.path_for(key).ok_or_else(|| delete_err("invalid key".into()))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(delete_err(e.to_string())),
        }
    }
}
