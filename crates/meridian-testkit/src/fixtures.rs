//! Replicated objects, appliers and multi-site clusters for tests.

use crate::time::ManualTime;
use crate::transport::InMemoryNetwork;
use async_trait::async_trait;
use meridian_core::effects::StorageError;
use meridian_core::messages::{CommitTsRequest, SeqCommitUpdatesRequest};
use meridian_core::{
    serialization, CrdtError, ObjectId, ReplicatedObject, TripleTimestamp, UpdateOperation,
};
use meridian_effects::MemoryStorageHandler;
use meridian_sequencer::pending::dependency_of;
use meridian_sequencer::{ReplicaApplier, Sequencer, SequencerConfig, SequencerError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Operation-based counter: each operation adds a signed delta.
///
/// Operations are keyed by their triple timestamp, so applying one twice or
/// merging overlapping replicas counts it once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterObject {
    deltas: BTreeMap<TripleTimestamp, i64>,
}

impl CounterObject {
    /// Sum of every applied delta
    pub fn value(&self) -> i64 {
        self.deltas.values().sum()
    }

    /// Payload of an operation adding `delta`
    pub fn delta_payload(delta: i64) -> Vec<u8> {
        serialization::to_vec(&delta).expect("an i64 always encodes")
    }

    /// Operation adding `delta` at `timestamp`
    pub fn operation(timestamp: TripleTimestamp, delta: i64) -> UpdateOperation {
        UpdateOperation::new(timestamp, Self::delta_payload(delta))
    }
}

impl ReplicatedObject for CounterObject {
    fn apply_update(&mut self, op: &UpdateOperation) -> Result<(), CrdtError> {
        let delta: i64 = serialization::from_slice(&op.payload)
            .map_err(|e| CrdtError::malformed_operation(format!("counter delta: {e}")))?;
        self.deltas.insert(op.timestamp.clone(), delta);
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<(), CrdtError> {
        for (ts, delta) in &other.deltas {
            self.deltas.entry(ts.clone()).or_insert(*delta);
        }
        Ok(())
    }
}

/// Applier that records every dispatch and commits nothing.
#[derive(Default)]
pub struct RecordingApplier {
    dispatched: Mutex<Vec<SeqCommitUpdatesRequest>>,
    failing: AtomicBool,
}

impl RecordingApplier {
    /// Applier that accepts every record
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every dispatched record, in dispatch order
    pub fn dispatched(&self) -> Vec<SeqCommitUpdatesRequest> {
        self.dispatched.lock().clone()
    }

    /// Make later dispatches fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplicaApplier for RecordingApplier {
    async fn apply(&self, request: SeqCommitUpdatesRequest) -> Result<(), SequencerError> {
        self.dispatched.lock().push(request);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("replica unavailable".to_string()).into());
        }
        Ok(())
    }
}

/// Applier that folds remote updates into local counters and then finalizes
/// the timestamp on its sequencer.
#[derive(Default)]
pub struct CounterReplica {
    objects: Mutex<HashMap<ObjectId, CounterObject>>,
    sequencer: OnceLock<Weak<Sequencer>>,
}

impl CounterReplica {
    /// Replica with no counters yet, not yet attached
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind the replica to the sequencer it finalizes timestamps on
    pub fn attach(&self, sequencer: &Arc<Sequencer>) {
        let _ = self.sequencer.set(Arc::downgrade(sequencer));
    }

    /// Current value of a counter, zero if never written
    pub fn value(&self, id: &ObjectId) -> i64 {
        self.objects.lock().get(id).map_or(0, CounterObject::value)
    }
}

#[async_trait]
impl ReplicaApplier for CounterReplica {
    async fn apply(&self, request: SeqCommitUpdatesRequest) -> Result<(), SequencerError> {
        {
            let mut objects = self.objects.lock();
            for group in &request.update_groups {
                objects
                    .entry(group.target().clone())
                    .or_default()
                    .apply_group(group)
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            }
        }

        let Some(sequencer) = self.sequencer.get().and_then(Weak::upgrade) else {
            return Err(SequencerError::Shutdown);
        };
        sequencer
            .commit_ts(CommitTsRequest {
                version: dependency_of(&request),
                timestamp: request.base_timestamp,
                client_timestamp: request.client_timestamp,
                commit: true,
                update_groups: request.update_groups,
            })
            .await
            .map(|_| ())
    }
}

/// One site of a [`SequencerCluster`].
pub struct TestSite {
    /// Sequencer currently running at the site
    pub sequencer: Arc<Sequencer>,
    /// Storage shared across restarts of the site
    pub storage: MemoryStorageHandler,
}

/// Sequencers that see each other as peers over one [`InMemoryNetwork`],
/// sharing one [`ManualTime`]. A site's peer address is its site id.
pub struct SequencerCluster {
    /// Network every site listens on
    pub network: Arc<InMemoryNetwork>,
    /// Clock shared by every site
    pub time: ManualTime,
    sites: BTreeMap<String, TestSite>,
}

impl SequencerCluster {
    /// Fully connected cluster with default timings
    pub fn new(sites: &[&str]) -> Self {
        let configs = sites
            .iter()
            .map(|site| {
                SequencerConfig::new(*site)
                    .with_peers(sites.iter().filter(|other| *other != site).copied())
            })
            .collect();
        Self::with_configs(configs)
    }

    /// Cluster over explicit configurations, registered under their site ids
    pub fn with_configs(configs: Vec<SequencerConfig>) -> Self {
        let mut cluster = Self {
            network: InMemoryNetwork::new(),
            time: ManualTime::starting_at(1_000),
            sites: BTreeMap::new(),
        };
        for config in configs {
            let address = config.site_id.to_string();
            cluster.add_site(address, config, None);
        }
        cluster
    }

    /// Add (or replace) a site reachable at `address`.
    pub fn add_site(
        &mut self,
        address: impl Into<String>,
        config: SequencerConfig,
        applier: Option<Arc<dyn ReplicaApplier>>,
    ) -> Arc<Sequencer> {
        let address = address.into();
        let storage = MemoryStorageHandler::new();
        let sequencer = self.build(config, storage.clone(), applier);
        self.network.register(address.as_str(), &sequencer);
        self.sites.insert(
            address,
            TestSite {
                sequencer: sequencer.clone(),
                storage,
            },
        );
        sequencer
    }

    /// Replace a site's sequencer with a fresh one over the same storage,
    /// as after a crash. The new sequencer is not yet recovered.
    pub fn restart(&mut self, address: &str) -> Arc<Sequencer> {
        let site = self.site(address);
        let config = site.sequencer.config().clone();
        let applier = site.sequencer.applier();
        let storage = site.storage.clone();
        let sequencer = self.build(config, storage.clone(), applier);
        self.network.register(address, &sequencer);
        self.sites.insert(
            address.to_string(),
            TestSite {
                sequencer: sequencer.clone(),
                storage,
            },
        );
        sequencer
    }

    fn build(
        &self,
        config: SequencerConfig,
        storage: MemoryStorageHandler,
        applier: Option<Arc<dyn ReplicaApplier>>,
    ) -> Arc<Sequencer> {
        let mut sequencer = Sequencer::new(config, Arc::new(storage), Arc::new(self.time.clone()))
            .unwrap()
            .with_network(self.network.clone());
        if let Some(applier) = applier {
            sequencer = sequencer.with_applier(applier);
        }
        Arc::new(sequencer)
    }

    /// Panics on an unknown address
    pub fn site(&self, address: &str) -> &TestSite {
        self.sites
            .get(address)
            .unwrap_or_else(|| panic!("unknown site {address}"))
    }

    /// Running sequencer of a site
    pub fn sequencer(&self, address: &str) -> Arc<Sequencer> {
        self.site(address).sequencer.clone()
    }

    /// One anti-entropy round on every site. Returns records sent.
    pub async fn anti_entropy(&self) -> usize {
        let mut sent = 0;
        for site in self.sites.values() {
            sent += site.sequencer.anti_entropy_round().await;
        }
        sent
    }

    /// One pending-ops round on every site. Returns records dispatched.
    pub async fn apply_pending(&self) -> usize {
        let mut dispatched = 0;
        for site in self.sites.values() {
            dispatched += site.sequencer.pending_ops_round().await;
        }
        dispatched
    }

    /// Alternate propagation and application until neither makes progress,
    /// bounded by `max_rounds`. Returns the number of productive rounds.
    pub async fn settle(&self, max_rounds: usize) -> usize {
        for round in 0..max_rounds {
            let progress = self.anti_entropy().await + self.apply_pending().await;
            if progress == 0 {
                return round;
            }
        }
        max_rounds
    }
}
