//! Sequencer wire format.
//!
//! Every message travels in a [`SequencerWireMessage`] envelope carrying the
//! schema version. Decoding rejects any other version.

use meridian_core::effects::NetworkError;
use meridian_core::messages::{
    CommitTsReply, CommitTsRequest, GenerateTimestampReply, GenerateTimestampRequest,
    LatestKnownClockReply, LatestKnownClockRequest, SeqCommitUpdatesReply,
    SeqCommitUpdatesRequest,
};
use meridian_core::serialization;
use serde::{Deserialize, Serialize};

/// Schema version of [`SequencerWireMessage`]. Bump on any incompatible payload change.
pub const SEQUENCER_WIRE_SCHEMA_VERSION: u16 = 1;

/// Tagged union of every sequencer request and reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerPayload {
    /// Client asks for a fresh timestamp
    GenerateTimestamp(GenerateTimestampRequest),
    /// Issued timestamp, or none for a finalized client request
    GenerateTimestampReply(GenerateTimestampReply),
    /// Client commits or abandons an issued timestamp
    CommitTs(CommitTsRequest),
    /// Commit outcome and the sequencer's clocks
    CommitTsReply(CommitTsReply),
    /// Commit record pushed to a peer or backup
    SeqCommitUpdates(SeqCommitUpdatesRequest),
    /// Acknowledgement carrying the receiver's clocks
    SeqCommitUpdatesReply(SeqCommitUpdatesReply),
    /// Ask for the sequencer's current and stable clocks
    LatestKnownClock(LatestKnownClockRequest),
    /// Reply to [`SequencerPayload::LatestKnownClock`]
    LatestKnownClockReply(LatestKnownClockReply),
}

impl SequencerPayload {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SequencerPayload::GenerateTimestamp(_) => "generate_timestamp",
            SequencerPayload::GenerateTimestampReply(_) => "generate_timestamp_reply",
            SequencerPayload::CommitTs(_) => "commit_ts",
            SequencerPayload::CommitTsReply(_) => "commit_ts_reply",
            SequencerPayload::SeqCommitUpdates(_) => "seq_commit_updates",
            SequencerPayload::SeqCommitUpdatesReply(_) => "seq_commit_updates_reply",
            SequencerPayload::LatestKnownClock(_) => "latest_known_clock",
            SequencerPayload::LatestKnownClockReply(_) => "latest_known_clock_reply",
        }
    }

    /// Whether a backup sequencer may serve this request
    pub fn allowed_on_backup(&self) -> bool {
        matches!(self, SequencerPayload::SeqCommitUpdates(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerWireMessage {
    /// Must equal [`SEQUENCER_WIRE_SCHEMA_VERSION`] to be accepted
    pub schema_version: u16,
    /// The request or reply itself
    pub payload: SequencerPayload,
}

impl SequencerWireMessage {
    /// Wrap a payload in the current schema version.
    pub fn new(payload: SequencerPayload) -> Self {
        Self {
            schema_version: SEQUENCER_WIRE_SCHEMA_VERSION,
            payload,
        }
    }

    /// Whether the envelope carries the schema version this build speaks
    pub fn is_current_version(&self) -> bool {
        self.schema_version == SEQUENCER_WIRE_SCHEMA_VERSION
    }

    /// Extract a replication acknowledgement.
    pub fn into_seq_commit_updates_reply(self) -> Option<SeqCommitUpdatesReply> {
        match self.payload {
            SequencerPayload::SeqCommitUpdatesReply(reply) => Some(reply),
            _ => None,
        }
    }
}

/// Encode an envelope for the network.
pub fn serialize_message(msg: &SequencerWireMessage) -> Result<Vec<u8>, NetworkError> {
    serialization::to_vec(msg).map_err(|e| NetworkError::Malformed {
        reason: e.to_string(),
    })
}

/// Decode an envelope, rejecting other schema versions.
pub fn deserialize_message(bytes: &[u8]) -> Result<SequencerWireMessage, NetworkError> {
    let msg: SequencerWireMessage =
        serialization::from_slice(bytes).map_err(|e| NetworkError::Malformed {
            reason: e.to_string(),
        })?;
    if !msg.is_current_version() {
        return Err(NetworkError::Malformed {
            reason: format!(
                "unsupported schema version {} (expected {})",
                msg.schema_version, SEQUENCER_WIRE_SCHEMA_VERSION
            ),
        });
    }
    Ok(msg)
}
