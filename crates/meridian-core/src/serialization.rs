//! Canonical binary encoding for persisted records and wire payloads.

use crate::errors::MeridianError;
use serde::{de::DeserializeOwned, Serialize};

/// Serialize any serde-compatible type to bincode bytes
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, MeridianError> {
    bincode::serialize(value)
        .map_err(|e| MeridianError::serialization(format!("Failed to encode: {e}")))
}

/// Deserialize bincode bytes to any serde-compatible type
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MeridianError> {
    bincode::deserialize(bytes)
        .map_err(|e| MeridianError::serialization(format!("Failed to decode: {e}")))
}
