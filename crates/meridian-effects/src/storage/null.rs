//! Storage handler for non-durable deployments

use async_trait::async_trait;
use meridian_core::effects::{StorageEffects, StorageError};

/// Accepts every write and forgets it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorageHandler;

impl NullStorageHandler {
    /// Create a null storage handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageEffects for NullStorageHandler {
    async fn store(&self, _key: &str, _value: Vec<u8>) -> Result<(), StorageError> {
        Ok(())
    }

    async fn retrieve(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nothing_is_kept() {
        let storage = NullStorageHandler::new();
        storage.store("sys/clock", vec![7]).await.unwrap();
        assert_eq!(storage.retrieve("sys/clock").await.unwrap(), None);
        assert!(!storage.remove("sys/clock").await.unwrap());
    }
}
