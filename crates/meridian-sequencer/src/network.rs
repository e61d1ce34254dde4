//! Transport seam between sequencers.

use crate::wire::SequencerWireMessage;
use async_trait::async_trait;
use meridian_core::effects::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a peer sequencer or backup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Create a new peer address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Request/reply messaging with at-most-once delivery per attempt.
///
/// Implementations must not retry; the sequencer owns retry and
/// acknowledgement.
#[async_trait]
pub trait SequencerNetwork: Send + Sync {
    /// Deliver a request and wait for its reply
    async fn request(
        &self,
        to: &PeerAddress,
        message: SequencerWireMessage,
    ) -> Result<SequencerWireMessage, NetworkError>;

    /// Deliver a message without waiting for a reply
    async fn send(&self, to: &PeerAddress, message: SequencerWireMessage)
        -> Result<(), NetworkError>;
}
