//! Filesystem storage handler
//!
//! Each key maps to `<base>/<key>.dat`. Keys may contain `/`, which become
//! subdirectories.

use async_trait::async_trait;
use meridian_core::effects::{StorageEffects, StorageError};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Filesystem-based storage handler
#[derive(Debug, Clone)]
pub struct FilesystemStorageHandler {
    base_path: PathBuf,
}

impl FilesystemStorageHandler {
    /// Create a handler rooted at `base_path`; the directory is created on
    /// first write.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                reason: "Key cannot be empty".to_string(),
            });
        }
        if key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StorageError::InvalidKey {
                reason: format!("Key {key:?} has an empty or parent segment"),
            });
        }
        Ok(self.base_path.join(format!("{key}.dat")))
    }
}

#[async_trait]
impl StorageEffects for FilesystemStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let file_path = self.file_path(key)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::WriteFailed(format!("Failed to create directory: {e}"))
            })?;
        }

        fs::write(&file_path, value)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("Failed to write file: {e}")))?;
        debug!(key, "stored");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let file_path = self.file_path(key)?;
        match fs::read(&file_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed(format!("Failed to read file: {e}"))),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let file_path = self.file_path(key)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to remove file: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path().to_path_buf());

        assert_eq!(storage.retrieve("sys/commit/dc-a").await.unwrap(), None);
        storage.store("sys/commit/dc-a", vec![4, 5, 6]).await.unwrap();
        assert_eq!(
            storage.retrieve("sys/commit/dc-a").await.unwrap(),
            Some(vec![4, 5, 6])
        );
        assert!(dir.path().join("sys/commit/dc-a.dat").exists());

        assert!(storage.remove("sys/commit/dc-a").await.unwrap());
        assert!(!storage.remove("sys/commit/dc-a").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path().to_path_buf());

        assert!(matches!(
            storage.store("", vec![]).await,
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            storage.store("../outside", vec![]).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
