//! Durable key-value storage used to persist clocks and commit logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Storage operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StorageError {
    /// Key rejected by the handler
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },
    /// Write did not complete
    #[error("Write failed: {0}")]
    WriteFailed(String),
    /// Read did not complete
    #[error("Read failed: {0}")]
    ReadFailed(String),
    /// Delete did not complete
    #[error("Delete failed: {0}")]
    DeleteFailed(String),
}

/// Asynchronous key-value storage.
///
/// A handler may be non-durable: [`StorageEffects::retrieve`] returning `None`
/// for a key that was stored is acceptable for deployments without
/// persistence.
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Store a value, replacing any previous one
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Read a value
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove a value, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;
}
