//! Request and reply bodies exchanged with sequencers.
//!
//! Framing and schema versioning live with the sequencer's wire envelope; the
//! structs here are plain data shared by clients and sequencers.

use crate::clock::CausalityClock;
use crate::identifiers::SiteId;
use crate::time::Timestamp;
use crate::updates::ObjectUpdatesGroup;
use serde::{Deserialize, Serialize};

/// Ask for a global timestamp for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateTimestampRequest {
    /// Causal snapshot the transaction read from
    pub dependency: CausalityClock,
    /// Client-side sequence number of the request
    pub client_timestamp: Timestamp,
}

/// Reply to [`GenerateTimestampRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateTimestampReply {
    /// Newly issued timestamp, `None` when the request was a retry of one the
    /// sequencer already finalized
    pub timestamp: Option<Timestamp>,
    /// Highest client counter the sequencer has finalized for this client
    pub client_latest_counter: i64,
}

/// Finalize a previously issued timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTsRequest {
    /// Dependency clock of the committing transaction
    pub version: CausalityClock,
    /// Timestamp being finalized
    pub timestamp: Timestamp,
    /// Client-side sequence number of the transaction
    pub client_timestamp: Timestamp,
    /// `false` abandons the timestamp instead of committing it
    pub commit: bool,
    /// Updates of the transaction, already rebased on `timestamp`
    pub update_groups: Vec<ObjectUpdatesGroup>,
}

/// Outcome of a [`CommitTsRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitTsStatus {
    /// Timestamp finalized
    Ok,
    /// Timestamp unknown or already finalized; retry with a fresh one
    Failed,
}

/// Reply to [`CommitTsRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTsReply {
    /// Outcome
    pub status: CommitTsStatus,
    /// Sequencer's current state after the commit
    pub current_clock: CausalityClock,
    /// Sequencer's stable clock after the commit
    pub stable_clock: CausalityClock,
}

impl CommitTsReply {
    /// Whether the commit succeeded
    pub fn is_ok(&self) -> bool {
        self.status == CommitTsStatus::Ok
    }
}

/// Peer-to-peer propagation of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqCommitUpdatesRequest {
    /// Sequencer that committed the transaction
    pub origin_site: SiteId,
    /// Global timestamp of the transaction
    pub base_timestamp: Timestamp,
    /// Client-side sequence number of the transaction
    pub client_timestamp: Timestamp,
    /// Updates of the transaction
    pub update_groups: Vec<ObjectUpdatesGroup>,
    /// Records the sender has received so far
    pub sender_clock: CausalityClock,
    /// Timestamps the sender finalized without a client confirming them
    pub not_used: CausalityClock,
}

/// Acknowledgement of a [`SeqCommitUpdatesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqCommitUpdatesReply {
    /// Replying sequencer
    pub site_id: SiteId,
    /// Replier's current state
    pub current_clock: CausalityClock,
    /// Replier's stable clock
    pub stable_clock: CausalityClock,
    /// Records the replier has received so far
    pub received_clock: CausalityClock,
}

/// Read the sequencer's clocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestKnownClockRequest {}

/// Reply to [`LatestKnownClockRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestKnownClockReply {
    /// Sequencer's current state
    pub current_clock: CausalityClock,
    /// Sequencer's stable clock
    pub stable_clock: CausalityClock,
}
