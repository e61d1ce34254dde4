//! Sequencer configuration.

use crate::network::PeerAddress;
use meridian_core::config::{parse_bool, parse_u64};
use meridian_core::{MeridianConfig, MeridianError, SiteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default lifetime of an issued timestamp before its lease may expire
pub const DEFAULT_TXN_ID_LIFETIME_MS: u64 = 10_000;

/// Default backoff before a commit record is resent to a peer
pub const DEFAULT_INTER_SEQUENCER_RETRY_MS: u64 = 1_000;

/// Default backoff before a remote commit is handed to the applier again
pub const DEFAULT_PENDING_OP_RESEND_MS: u64 = 2_000;

/// Default idle poll interval of the pending-ops loop
pub const DEFAULT_PENDING_OP_POLL_MS: u64 = 50;

/// Default interval of the lease sweep
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 500;

/// Default bound on a single peer request
pub const DEFAULT_PEER_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Configuration of one sequencer.
///
/// Peers are indexed by their position in [`SequencerConfig::peers`]; that
/// index is the slot of the peer in every commit record's acknowledgement set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Site this sequencer issues timestamps for
    pub site_id: SiteId,

    /// Other primary sequencers, in acknowledgement-slot order
    pub peers: Vec<PeerAddress>,

    /// Shadow that receives every local commit
    pub backup: Option<PeerAddress>,

    /// Whether this sequencer is itself a backup
    pub is_backup: bool,

    /// Lifetime of an issued timestamp; leases expire after twice this
    pub txn_id_lifetime_ms: u64,

    /// Backoff before resending a commit record to peers
    pub inter_sequencer_retry_ms: u64,

    /// Backoff before re-dispatching a remote commit
    pub pending_op_resend_ms: u64,

    /// Idle poll interval of the pending-ops loop
    pub pending_op_poll_ms: u64,

    /// Interval of the lease sweep
    pub maintenance_interval_ms: u64,

    /// Bound on a single peer request
    pub peer_request_timeout_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            site_id: SiteId::new("dc-0"),
            peers: Vec::new(),
            backup: None,
            is_backup: false,
            txn_id_lifetime_ms: DEFAULT_TXN_ID_LIFETIME_MS,
            inter_sequencer_retry_ms: DEFAULT_INTER_SEQUENCER_RETRY_MS,
            pending_op_resend_ms: DEFAULT_PENDING_OP_RESEND_MS,
            pending_op_poll_ms: DEFAULT_PENDING_OP_POLL_MS,
            maintenance_interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
            peer_request_timeout_ms: DEFAULT_PEER_REQUEST_TIMEOUT_MS,
        }
    }
}

impl SequencerConfig {
    /// Configuration for `site_id` with default timings and no peers
    pub fn new(site_id: impl Into<SiteId>) -> Self {
        Self {
            site_id: site_id.into(),
            ..Self::default()
        }
    }

    /// Set the peer list
    pub fn with_peers<I, P>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerAddress>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the backup address
    pub fn with_backup(mut self, backup: impl Into<PeerAddress>) -> Self {
        self.backup = Some(backup.into());
        self
    }

    /// Mark this sequencer as a backup
    pub fn as_backup(mut self) -> Self {
        self.is_backup = true;
        self
    }

    /// Age after which an unconfirmed lease is finalized as unused
    pub fn lease_expiry_ms(&self) -> u64 {
        self.txn_id_lifetime_ms.saturating_mul(2)
    }

    /// Delay before a record is resent to a peer
    pub fn inter_sequencer_retry(&self) -> Duration {
        Duration::from_millis(self.inter_sequencer_retry_ms)
    }

    /// Interval between pending-op rounds
    pub fn pending_op_poll(&self) -> Duration {
        Duration::from_millis(self.pending_op_poll_ms)
    }

    /// Interval between lease sweeps
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// How long one peer request may take
    pub fn peer_request_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_request_timeout_ms)
    }

    /// Whether local commits are forwarded to a backup
    pub fn forwards_to_backup(&self) -> bool {
        !self.is_backup && self.backup.is_some()
    }
}

impl MeridianConfig for SequencerConfig {
    const ENV_PREFIX: &'static str = "MERIDIAN_SEQUENCER_";

    fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), MeridianError> {
        match key {
            "site_id" => self.site_id = SiteId::new(value.trim()),
            "peers" => {
                self.peers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PeerAddress::from)
                    .collect();
            }
            "backup" => {
                let value = value.trim();
                self.backup = (!value.is_empty()).then(|| PeerAddress::from(value));
            }
            "is_backup" => self.is_backup = parse_bool(key, value)?,
            "txn_id_lifetime_ms" => self.txn_id_lifetime_ms = parse_u64(key, value)?,
            "inter_sequencer_retry_ms" => self.inter_sequencer_retry_ms = parse_u64(key, value)?,
            "pending_op_resend_ms" => self.pending_op_resend_ms = parse_u64(key, value)?,
            "pending_op_poll_ms" => self.pending_op_poll_ms = parse_u64(key, value)?,
            "maintenance_interval_ms" => self.maintenance_interval_ms = parse_u64(key, value)?,
            "peer_request_timeout_ms" => self.peer_request_timeout_ms = parse_u64(key, value)?,
            other => {
                return Err(MeridianError::invalid(format!(
                    "Unknown sequencer setting: {other}"
                )))
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), MeridianError> {
        if self.site_id.is_empty() {
            return Err(MeridianError::invalid("site_id must not be empty"));
        }

        let intervals = [
            ("txn_id_lifetime_ms", self.txn_id_lifetime_ms),
            ("inter_sequencer_retry_ms", self.inter_sequencer_retry_ms),
            ("pending_op_resend_ms", self.pending_op_resend_ms),
            ("pending_op_poll_ms", self.pending_op_poll_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
            ("peer_request_timeout_ms", self.peer_request_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(MeridianError::invalid(format!("{name} must be positive")));
            }
        }

        let mut seen = BTreeSet::new();
        for peer in &self.peers {
            if !seen.insert(peer) {
                return Err(MeridianError::invalid(format!("Duplicate peer: {peer}")));
            }
        }

        if let Some(backup) = &self.backup {
            if self.is_backup {
                return Err(MeridianError::invalid(
                    "A backup sequencer cannot have its own backup",
                ));
            }
            if seen.contains(backup) {
                return Err(MeridianError::invalid(format!(
                    "Backup {backup} is also listed as a peer"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = SequencerConfig::defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_expiry_ms(), 2 * DEFAULT_TXN_ID_LIFETIME_MS);
        assert!(!config.forwards_to_backup());
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config = SequencerConfig::from_toml_str(
            r#"
            site_id = "dc-eu"
            peers = ["dc-us", "dc-ap"]
            backup = "dc-eu-shadow"
            "#,
        )
        .unwrap();

        assert_eq!(config.site_id, SiteId::new("dc-eu"));
        assert_eq!(config.peers.len(), 2);
        assert!(config.forwards_to_backup());
        assert_eq!(config.pending_op_resend_ms, DEFAULT_PENDING_OP_RESEND_MS);
    }

    #[test]
    fn environment_overrides() {
        let mut config = SequencerConfig::new("dc-a");
        config
            .merge_with_vars([
                ("MERIDIAN_SEQUENCER_PEERS".to_string(), "dc-b, dc-c".to_string()),
                ("MERIDIAN_SEQUENCER_TXN_ID_LIFETIME_MS".to_string(), "250".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ])
            .unwrap();

        assert_eq!(config.peers, vec![PeerAddress::from("dc-b"), PeerAddress::from("dc-c")]);
        assert_eq!(config.txn_id_lifetime_ms, 250);

        let bad = config.merge_with_vars([(
            "MERIDIAN_SEQUENCER_NO_SUCH_KEY".to_string(),
            "1".to_string(),
        )]);
        assert!(bad.is_err());
    }

    #[test]
    fn validation_rejects_inconsistent_topologies() {
        assert!(SequencerConfig::new("").validate().is_err());
        assert!(SequencerConfig::new("a")
            .with_peers(["b", "b"])
            .validate()
            .is_err());
        assert!(SequencerConfig::new("a")
            .with_peers(["b"])
            .with_backup("b")
            .validate()
            .is_err());
        assert!(SequencerConfig::new("a")
            .with_backup("a-shadow")
            .as_backup()
            .validate()
            .is_err());

        let mut zero = SequencerConfig::new("a");
        zero.pending_op_poll_ms = 0;
        assert!(zero.validate().is_err());
    }
}
