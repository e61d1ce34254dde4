//! Sequencer errors.

use meridian_core::effects::{NetworkError, StorageError};
use meridian_core::MeridianError;

/// Errors returned by sequencer operations.
///
/// Causal unsatisfiability never appears here: such requests are parked, not
/// rejected. A duplicate or unknown timestamp is a `Failed` commit status, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    /// Request needs a primary sequencer and this one is a backup
    #[error("Sequencer {site} is a backup and cannot serve this request")]
    NotPrimary {
        /// Site of the refusing sequencer
        site: String,
    },

    /// A parked request was replaced by a retry with the same client timestamp
    #[error("Request {client_timestamp} superseded by a retry")]
    Superseded {
        /// Client timestamp of the replaced request
        client_timestamp: String,
    },

    /// The sequencer stopped before answering
    #[error("Sequencer shut down before replying")]
    Shutdown,

    /// Durable storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Peer transport failed
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration rejected
    #[error("Configuration error: {message}")]
    Config {
        /// Validation failure
        message: String,
    },
}

impl From<MeridianError> for SequencerError {
    fn from(err: MeridianError) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
