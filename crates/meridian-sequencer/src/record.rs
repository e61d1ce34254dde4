//! Commit records awaiting propagation.

use meridian_core::messages::SeqCommitUpdatesRequest;
use meridian_core::{CausalityClock, ObjectUpdatesGroup, SiteId, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-peer acknowledgement flags, indexed like the configured peer list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSet {
    acked: Vec<bool>,
}

impl AckSet {
    /// No peer acknowledged yet
    pub fn new(peer_count: usize) -> Self {
        Self {
            acked: vec![false; peer_count],
        }
    }

    /// Mark a peer as acknowledged. Returns `false` for an unknown slot.
    pub fn ack(&mut self, peer: usize) -> bool {
        match self.acked.get_mut(peer) {
            Some(slot) => {
                *slot = true;
                true
            }
            None => false,
        }
    }

    /// Unknown slots read as not acknowledged
    pub fn is_acked(&self, peer: usize) -> bool {
        self.acked.get(peer).copied().unwrap_or(false)
    }

    /// Every peer acknowledged (vacuously true without peers)
    pub fn is_complete(&self) -> bool {
        self.acked.iter().all(|a| *a)
    }

    /// Slots still waiting for an acknowledgement
    pub fn missing(&self) -> Vec<usize> {
        self.acked
            .iter()
            .enumerate()
            .filter(|(_, acked)| !**acked)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of peers that acknowledged
    pub fn acked_count(&self) -> usize {
        self.acked.iter().filter(|a| **a).count()
    }
}

/// One locally committed transaction queued for propagation to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Timestamp the sequencer issued for the transaction
    pub base_timestamp: Timestamp,
    /// Client-side identity of the transaction
    pub client_timestamp: Timestamp,
    /// Updates to apply at every replica
    pub update_groups: Vec<ObjectUpdatesGroup>,
    /// Timestamps finalized as unused since the previous record
    pub not_used: CausalityClock,
    /// Which peers have acknowledged the record
    pub acked: AckSet,
    /// Physical time of the last send, `None` until first sent
    pub last_sent_ms: Option<u64>,
}

impl CommitRecord {
    /// Fresh record that no peer has seen
    pub fn new(
        base_timestamp: Timestamp,
        client_timestamp: Timestamp,
        update_groups: Vec<ObjectUpdatesGroup>,
        not_used: CausalityClock,
        peer_count: usize,
    ) -> Self {
        Self {
            base_timestamp,
            client_timestamp,
            update_groups,
            not_used,
            acked: AckSet::new(peer_count),
            last_sent_ms: None,
        }
    }

    /// Whether the record may be (re)sent at `now_ms`.
    pub fn is_due(&self, now_ms: u64, retry_ms: u64) -> bool {
        match self.last_sent_ms {
            None => true,
            Some(sent) => now_ms >= sent.saturating_add(retry_ms),
        }
    }

    /// Build the propagation message for this record.
    pub fn to_request(&self, origin: &SiteId, sender_clock: CausalityClock) -> SeqCommitUpdatesRequest {
        SeqCommitUpdatesRequest {
            origin_site: origin.clone(),
            base_timestamp: self.base_timestamp.clone(),
            client_timestamp: self.client_timestamp.clone(),
            update_groups: self.update_groups.clone(),
            sender_clock,
            not_used: self.not_used.clone(),
        }
    }
}
