//! Transport failures surfaced to the sequencing core.
//!
//! The transport delivers each attempt at most once. Retries and
//! acknowledgements are layered on top by the sequencer.

use serde::{Deserialize, Serialize};

/// Network operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum NetworkError {
    /// Message could not be delivered
    #[error("Failed to send message to {peer}: {reason}")]
    SendFailed {
        /// Destination of the message
        peer: String,
        /// Reason for the failure
        reason: String,
    },
    /// Destination is not known to the transport
    #[error("Unknown peer: {peer}")]
    UnknownPeer {
        /// Destination of the message
        peer: String,
    },
    /// Destination accepted the request but produced no reply
    #[error("No reply from {peer}")]
    NoReply {
        /// Destination of the message
        peer: String,
    },
    /// No reply within the allotted time
    #[error("Request to {peer} timed out after {timeout_ms}ms")]
    Timeout {
        /// Destination of the message
        peer: String,
        /// Time waited
        timeout_ms: u64,
    },
    /// Bytes on the wire could not be decoded
    #[error("Malformed message: {reason}")]
    Malformed {
        /// Decoding failure description
        reason: String,
    },
}

impl NetworkError {
    /// Create a send failure
    pub fn send_failed(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            peer: peer.into(),
            reason: reason.into(),
        }
    }
}
