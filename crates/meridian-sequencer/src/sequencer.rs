//! The sequencer service.
//!
//! A sequencer is the timestamp authority of one site. It issues globally
//! unique timestamps to clients once their causal dependencies are committed,
//! finalizes those timestamps in per-origin FIFO order, and hands every local
//! commit to the replication machinery in [`crate::replication`].
//!
//! Requests that cannot be served yet are parked rather than rejected:
//! timestamp requests wait in the blocked map until the current clock covers
//! their dependency, and commits wait in the FIFO until no older lease of the
//! same site is outstanding.

use crate::config::SequencerConfig;
use crate::error::SequencerError;
use crate::fifo::FifoQueues;
use crate::network::SequencerNetwork;
use crate::pending::{PendingOp, ReplicaApplier};
use crate::record::CommitRecord;
use crate::state::{ClockState, Finalized, RemoteState};
use crate::wire::{SequencerPayload, SequencerWireMessage};
use meridian_core::effects::{PhysicalTimeEffects, StorageEffects, StorageError};
use meridian_core::messages::{
    CommitTsReply, CommitTsRequest, CommitTsStatus, GenerateTimestampReply,
    GenerateTimestampRequest, LatestKnownClockReply, SeqCommitUpdatesReply,
    SeqCommitUpdatesRequest,
};
use meridian_core::{serialization, CausalityClock, SiteId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// Storage key of the persisted [`PersistedClocks`]
pub const CLOCK_KEY: &str = "sys/clock";

/// Storage key of the last commit record queued for `site`
pub fn commit_record_key(site: &SiteId) -> String {
    format!("sys/commit/{site}")
}

/// Clocks written after every finalization and read back by
/// [`Sequencer::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedClocks {
    /// Every finalized timestamp
    pub current: CausalityClock,
    /// Every finalized client request
    pub client: CausalityClock,
}

struct BlockedRequest {
    request: GenerateTimestampRequest,
    reply: oneshot::Sender<GenerateTimestampReply>,
}

pub(crate) struct QueuedCommit {
    request: CommitTsRequest,
    reply: oneshot::Sender<CommitTsReply>,
}

enum Issue {
    Ready(GenerateTimestampReply),
    Parked(oneshot::Receiver<GenerateTimestampReply>),
}

/// Timestamp authority and replication endpoint of one site.
pub struct Sequencer {
    pub(crate) config: SequencerConfig,
    storage: Arc<dyn StorageEffects>,
    pub(crate) time: Arc<dyn PhysicalTimeEffects>,
    pub(crate) network: Option<Arc<dyn SequencerNetwork>>,
    pub(crate) applier: Option<Arc<dyn ReplicaApplier>>,

    pub(crate) state: Mutex<ClockState>,
    pub(crate) remote: Mutex<RemoteState>,
    blocked: Mutex<BTreeMap<Timestamp, BlockedRequest>>,
    fifo: Mutex<FifoQueues<QueuedCommit>>,
    commit_gate: async_lock::Mutex<()>,

    /// Local commit records per origin, awaiting peer acknowledgements
    pub(crate) ops: Mutex<BTreeMap<SiteId, VecDeque<CommitRecord>>>,
    /// Remote commits awaiting their dependencies
    pub(crate) pending_ops: Mutex<VecDeque<PendingOp>>,
    pub(crate) ops_changed: Notify,
    pub(crate) pending_changed: Notify,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer").finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Create a sequencer after validating its configuration.
    ///
    /// The sequencer starts with empty clocks; call [`Sequencer::recover`]
    /// to resume from persisted state.
    pub fn new(
        config: SequencerConfig,
        storage: Arc<dyn StorageEffects>,
        time: Arc<dyn PhysicalTimeEffects>,
    ) -> Result<Self, SequencerError> {
        use meridian_core::MeridianConfig;
        config.validate()?;

        Ok(Self {
            state: Mutex::new(ClockState::new(config.site_id.clone())),
            config,
            storage,
            time,
            network: None,
            applier: None,
            remote: Mutex::new(RemoteState::default()),
            blocked: Mutex::new(BTreeMap::new()),
            fifo: Mutex::new(FifoQueues::default()),
            commit_gate: async_lock::Mutex::new(()),
            ops: Mutex::new(BTreeMap::new()),
            pending_ops: Mutex::new(VecDeque::new()),
            ops_changed: Notify::new(),
            pending_changed: Notify::new(),
        })
    }

    /// Attach the transport used to reach peers and the backup
    pub fn with_network(mut self, network: Arc<dyn SequencerNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    /// Attach the component that applies remote commits to local replicas
    pub fn with_applier(mut self, applier: Arc<dyn ReplicaApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// The attached replica applier, if any
    pub fn applier(&self) -> Option<Arc<dyn ReplicaApplier>> {
        self.applier.clone()
    }

    /// Site this sequencer issues timestamps for
    pub fn site_id(&self) -> &SiteId {
        &self.config.site_id
    }

    /// Configuration the sequencer was built with
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Whether this instance runs as a backup
    pub fn is_backup(&self) -> bool {
        self.config.is_backup
    }

    /// Snapshot of every finalized timestamp
    pub fn current_clock(&self) -> CausalityClock {
        self.state.lock().current.clone()
    }

    /// Snapshot of the stable clock
    pub fn stable_clock(&self) -> CausalityClock {
        self.state.lock().stable.clone()
    }

    /// Snapshot of the finalized client requests
    pub fn client_clock(&self) -> CausalityClock {
        self.state.lock().client.clone()
    }

    /// Snapshot of the local commit records queued so far
    pub fn received_clock(&self) -> CausalityClock {
        self.state.lock().received.clone()
    }

    /// Own timestamps finalized unused and not yet carried by a record
    pub fn not_used_clock(&self) -> CausalityClock {
        self.state.lock().not_used.clone()
    }

    /// Own timestamps finalized by lease expiry
    pub fn expired_clock(&self) -> CausalityClock {
        self.state.lock().expired.clone()
    }

    /// Merge of every clock peers have reported
    pub fn max_remote_clock(&self) -> CausalityClock {
        self.remote.lock().max_remote().clone()
    }

    /// Last clock reported by one peer site
    pub fn remote_clock(&self, site: &SiteId) -> Option<CausalityClock> {
        self.remote.lock().clock_of(site).cloned()
    }

    /// Issued timestamps not yet finalized
    pub fn lease_count(&self) -> usize {
        self.state.lock().lease_count()
    }

    /// Timestamp requests parked on their dependencies
    pub fn blocked_request_count(&self) -> usize {
        self.blocked.lock().len()
    }

    /// Commits waiting in the FIFO
    pub fn queued_commit_count(&self) -> usize {
        self.fifo.lock().len()
    }

    /// Local commit records not yet pruned from the replication queue
    pub fn replication_backlog(&self) -> usize {
        self.ops.lock().values().map(VecDeque::len).sum()
    }

    /// Remote commits not yet applied
    pub fn pending_op_count(&self) -> usize {
        self.pending_ops.lock().len()
    }

    fn ensure_primary(&self) -> Result<(), SequencerError> {
        if self.config.is_backup && !self.promote_to_primary() {
            return Err(SequencerError::NotPrimary {
                site: self.config.site_id.to_string(),
            });
        }
        Ok(())
    }

    /// Take over from a failed primary.
    ///
    /// Promotion is not supported; the request is logged and refused.
    pub fn promote_to_primary(&self) -> bool {
        warn!(
            site = %self.config.site_id,
            "Backup sequencer asked to act as primary; promotion is not supported"
        );
        false
    }

    /// Issue a global timestamp.
    ///
    /// Waits until the current clock covers `request.dependency` and the
    /// client's previous request is finalized. A retry of an already
    /// finalized client request is answered with no timestamp.
    pub async fn generate_timestamp(
        &self,
        request: GenerateTimestampRequest,
    ) -> Result<GenerateTimestampReply, SequencerError> {
        self.ensure_primary()?;
        let client_timestamp = request.client_timestamp.clone();

        let issue = {
            let mut blocked = self.blocked.lock();
            match self.try_generate(&request) {
                Some(reply) => Issue::Ready(reply),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let parked = BlockedRequest { request, reply: tx };
                    if blocked.insert(client_timestamp.clone(), parked).is_some() {
                        debug!(client_ts = %client_timestamp, "parked timestamp request replaced by retry");
                    }
                    Issue::Parked(rx)
                }
            }
        };

        self.sweep_expired_leases().await;

        match issue {
            Issue::Ready(reply) => Ok(reply),
            Issue::Parked(rx) => {
                debug!(client_ts = %client_timestamp, "timestamp request parked on dependencies");
                rx.await.map_err(|_| SequencerError::Superseded {
                    client_timestamp: client_timestamp.to_string(),
                })
            }
        }
    }

    fn try_generate(&self, request: &GenerateTimestampRequest) -> Option<GenerateTimestampReply> {
        let mut state = self.state.lock();
        let client_ts = &request.client_timestamp;
        let client_latest_counter = state.client.get_latest_counter(client_ts.site_id());

        if state.client.includes(client_ts) {
            return Some(GenerateTimestampReply {
                timestamp: None,
                client_latest_counter,
            });
        }

        let in_client_order = client_latest_counter.checked_add(1) == Some(client_ts.counter());
        if !in_client_order || !state.current.dominates_or_equals(&request.dependency) {
            return None;
        }

        let ts = state.issue(self.time.now_ms(), client_ts);
        debug!(ts = %ts, client_ts = %client_ts, "issued timestamp");
        Some(GenerateTimestampReply {
            timestamp: Some(ts),
            client_latest_counter,
        })
    }

    /// Re-evaluate parked timestamp requests. Returns how many were answered.
    pub fn retry_blocked_requests(&self) -> usize {
        let mut blocked = self.blocked.lock();
        let keys: Vec<Timestamp> = blocked.keys().cloned().collect();
        let mut answered = 0;

        for key in keys {
            let Some(entry) = blocked.get(&key) else {
                continue;
            };
            if entry.reply.is_closed() {
                blocked.remove(&key);
                continue;
            }
            if let Some(reply) = self.try_generate(&entry.request) {
                if let Some(entry) = blocked.remove(&key) {
                    // A requester that left now holds a lease that will expire
                    let _ = entry.reply.send(reply);
                    answered += 1;
                }
            }
        }
        answered
    }

    /// Finalize an issued timestamp, or abandon it when `commit` is false.
    ///
    /// A commit waits until the current clock covers its version clock.
    /// Commits of one site are applied in counter order: a commit also waits
    /// while an older lease of this sequencer is outstanding.
    pub async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, SequencerError> {
        self.ensure_primary()?;
        self.enqueue_commit(request).await
    }

    pub(crate) async fn enqueue_commit(
        &self,
        request: CommitTsRequest,
    ) -> Result<CommitTsReply, SequencerError> {
        let (tx, rx) = oneshot::channel();
        let ts = request.timestamp.clone();
        self.fifo
            .lock()
            .offer(&ts, QueuedCommit { request, reply: tx });

        self.drain_commit_queue().await;
        rx.await.map_err(|_| SequencerError::Shutdown)
    }

    /// Apply every commit whose turn has come. Returns how many were applied.
    pub async fn drain_commit_queue(&self) -> usize {
        let _gate = self.commit_gate.lock().await;
        let mut applied = 0;

        loop {
            let next = {
                let state = self.state.lock();
                let mut fifo = self.fifo.lock();
                fifo.pop_deliverable(|ts, queued| {
                    state.current.dominates_or_equals(&queued.request.version)
                        && !(state.is_own(ts) && state.has_earlier_lease(ts))
                })
            };
            let Some((_, queued)) = next else {
                break;
            };

            let reply = self.do_commit(queued.request).await;
            if queued.reply.send(reply).is_err() {
                debug!("commit requester went away before the reply");
            }
            applied += 1;
        }
        applied
    }

    async fn do_commit(&self, request: CommitTsRequest) -> CommitTsReply {
        let ts = &request.timestamp;

        let (outcome, not_used, current, stable) = {
            let mut state = self.state.lock();
            let own = state.is_own(ts);
            let outcome = if request.commit {
                let record_stable = self.config.peers.is_empty() || !own;
                state.commit(ts, &request.client_timestamp, record_stable)
            } else {
                state.abandon(ts, &request.client_timestamp)
            };
            let not_used = if own && request.commit && outcome == Finalized::Accepted {
                state.take_not_used()
            } else {
                CausalityClock::new()
            };
            (outcome, not_used, state.current.clone(), state.stable.clone())
        };

        if outcome == Finalized::Rejected {
            debug!(ts = %ts, commit = request.commit, "commit of unknown or finalized timestamp rejected");
            return CommitTsReply {
                status: CommitTsStatus::Failed,
                current_clock: current,
                stable_clock: stable,
            };
        }

        if request.commit {
            let record = CommitRecord::new(
                request.timestamp.clone(),
                request.client_timestamp.clone(),
                request.update_groups,
                not_used,
                self.config.peers.len(),
            );
            if self.config.forwards_to_backup() {
                self.forward_to_backup(&record);
            }
            self.add_to_ops(record).await;
            debug!(ts = %request.timestamp, "timestamp committed");
        } else {
            info!(ts = %request.timestamp, "timestamp abandoned by client");
        }

        self.persist_clocks().await;
        self.retry_blocked_requests();
        self.pending_changed.notify_one();

        CommitTsReply {
            status: CommitTsStatus::Ok,
            current_clock: current,
            stable_clock: stable,
        }
    }

    /// Hand a commit to the backup without waiting for it; the commit path
    /// never blocks on the backup link.
    fn forward_to_backup(&self, record: &CommitRecord) {
        let (Some(backup), Some(network)) = (&self.config.backup, &self.network) else {
            warn!(site = %self.config.site_id, "backup configured without a network");
            return;
        };
        let sender_clock = self.state.lock().received.clone();
        let message = SequencerWireMessage::new(SequencerPayload::SeqCommitUpdates(
            record.to_request(&self.config.site_id, sender_clock),
        ));
        let (backup, network) = (backup.clone(), network.clone());
        let ts = record.base_timestamp.clone();
        tokio::spawn(async move {
            if let Err(e) = network.send(&backup, message).await {
                warn!(backup = %backup, ts = %ts, error = %e, "failed to forward commit to backup");
            }
        });
    }

    /// Queue an own-site record for propagation, once per timestamp.
    pub(crate) async fn add_to_ops(&self, record: CommitRecord) {
        let ts = record.base_timestamp.clone();
        {
            let mut state = self.state.lock();
            if !state.is_own(&ts) || state.received.includes(&ts) {
                return;
            }
            state.received.record(&ts);
        }

        match serialization::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.storage.store(&commit_record_key(ts.site_id()), bytes).await {
                    warn!(ts = %ts, error = %e, "failed to persist commit record");
                }
            }
            Err(e) => warn!(ts = %ts, error = %e, "failed to encode commit record"),
        }

        if self.config.peers.is_empty() {
            return;
        }
        self.ops
            .lock()
            .entry(ts.site_id().clone())
            .or_default()
            .push_back(record);
        self.ops_changed.notify_one();
    }

    async fn persist_clocks(&self) {
        let snapshot = {
            let state = self.state.lock();
            PersistedClocks {
                current: state.current.clone(),
                client: state.client.clone(),
            }
        };
        match serialization::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = self.storage.store(CLOCK_KEY, bytes).await {
                    warn!(error = %e, "failed to persist sequencer clocks");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode sequencer clocks"),
        }
    }

    /// Accept a commit record from a peer (or, on a backup, from its primary).
    pub async fn seq_commit_updates(&self, request: SeqCommitUpdatesRequest) -> SeqCommitUpdatesReply {
        debug!(
            origin = %request.origin_site,
            ts = %request.base_timestamp,
            "received commit record"
        );
        self.add_to_ops(CommitRecord::new(
            request.base_timestamp.clone(),
            request.client_timestamp.clone(),
            request.update_groups.clone(),
            request.not_used.clone(),
            self.config.peers.len(),
        ))
        .await;
        let reply = self.replication_reply();

        if self.config.is_backup {
            {
                let mut state = self.state.lock();
                state.absorb_not_used(&request.not_used);
                state.mirror(&request.base_timestamp, &request.client_timestamp);
            }
            self.persist_clocks().await;
            return reply;
        }

        self.remote
            .lock()
            .observe(&request.origin_site, &request.sender_clock);
        self.add_pending(request);
        self.retry_blocked_requests();
        self.pending_changed.notify_one();
        reply
    }

    fn replication_reply(&self) -> SeqCommitUpdatesReply {
        let state = self.state.lock();
        SeqCommitUpdatesReply {
            site_id: self.config.site_id.clone(),
            current_clock: state.current.clone(),
            stable_clock: state.stable.clone(),
            received_clock: state.received.clone(),
        }
    }

    /// Report the current and stable clocks.
    pub fn latest_known_clock(&self) -> Result<LatestKnownClockReply, SequencerError> {
        self.ensure_primary()?;
        let state = self.state.lock();
        Ok(LatestKnownClockReply {
            current_clock: state.current.clone(),
            stable_clock: state.stable.clone(),
        })
    }

    /// Finalize every lease older than twice the transaction lifetime as
    /// unused. Returns the expired timestamps.
    pub async fn sweep_expired_leases(&self) -> Vec<Timestamp> {
        let now = self.time.now_ms();
        let expired = self
            .state
            .lock()
            .expire_leases(now, self.config.lease_expiry_ms());
        if expired.is_empty() {
            return expired;
        }

        warn!(
            site = %self.config.site_id,
            count = expired.len(),
            "finalized expired timestamp leases as unused"
        );
        self.persist_clocks().await;
        self.retry_blocked_requests();
        self.drain_commit_queue().await;
        expired
    }

    /// Remove a timestamp finalized by lease expiry from every clock.
    ///
    /// Returns `false` when `ts` was not expired by this sequencer.
    pub async fn forget_unused_timestamp(&self, ts: &Timestamp) -> bool {
        if !self.state.lock().forget_expired(ts) {
            return false;
        }
        info!(ts = %ts, "forgot expired timestamp");
        self.persist_clocks().await;
        true
    }

    /// Resume from the persisted clocks: every persisted timestamp counts as
    /// finalized and issuing continues after the highest own counter.
    pub async fn recover(&self) -> Result<(), SequencerError> {
        let Some(bytes) = self.storage.retrieve(CLOCK_KEY).await? else {
            info!(site = %self.config.site_id, "no persisted clocks, starting fresh");
            return Ok(());
        };
        let persisted: PersistedClocks = serialization::from_slice(&bytes)
            .map_err(|e| StorageError::ReadFailed(format!("corrupt sequencer clocks: {e}")))?;

        let resumed_after = {
            let mut state = self.state.lock();
            state.restore(&persisted.current, &persisted.client);
            state.last_issued_counter()
        };
        info!(
            site = %self.config.site_id,
            resumed_after,
            clock = %persisted.current,
            "recovered sequencer clocks"
        );
        Ok(())
    }

    /// The last commit record persisted for this site, if any
    pub async fn last_commit_record(&self) -> Result<Option<CommitRecord>, SequencerError> {
        let key = commit_record_key(&self.config.site_id);
        let Some(bytes) = self.storage.retrieve(&key).await? else {
            return Ok(None);
        };
        let record = serialization::from_slice(&bytes)
            .map_err(|e| StorageError::ReadFailed(format!("corrupt commit record: {e}")))?;
        Ok(Some(record))
    }

    /// Serve one wire message. Returns `None` when no reply is due: the
    /// message was itself a reply, carried another schema version, or asked a
    /// backup for something only a primary answers.
    pub async fn handle_message(&self, message: SequencerWireMessage) -> Option<SequencerWireMessage> {
        if !message.is_current_version() {
            warn!(version = message.schema_version, "dropping message with unsupported schema version");
            return None;
        }

        let kind = message.payload.kind();
        if self.config.is_backup && !message.payload.allowed_on_backup() {
            debug!(kind, "backup leaves primary-only message unanswered");
            return None;
        }

        let reply = match message.payload {
            SequencerPayload::GenerateTimestamp(request) => self
                .generate_timestamp(request)
                .await
                .map(SequencerPayload::GenerateTimestampReply),
            SequencerPayload::CommitTs(request) => self
                .commit_ts(request)
                .await
                .map(SequencerPayload::CommitTsReply),
            SequencerPayload::SeqCommitUpdates(request) => Ok(
                SequencerPayload::SeqCommitUpdatesReply(self.seq_commit_updates(request).await),
            ),
            SequencerPayload::LatestKnownClock(_) => self
                .latest_known_clock()
                .map(SequencerPayload::LatestKnownClockReply),
            SequencerPayload::GenerateTimestampReply(_)
            | SequencerPayload::CommitTsReply(_)
            | SequencerPayload::SeqCommitUpdatesReply(_)
            | SequencerPayload::LatestKnownClockReply(_) => {
                warn!(kind, "ignoring unsolicited reply");
                return None;
            }
        };

        match reply {
            Ok(payload) => Some(SequencerWireMessage::new(payload)),
            Err(e) => {
                debug!(kind, error = %e, "request left unanswered");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PeerAddress;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use meridian_core::effects::NetworkError;
    use meridian_core::messages::LatestKnownClockRequest;
    use meridian_effects::MemoryStorageHandler;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Accepts every message and never completes delivery.
    #[derive(Default)]
    struct StalledNetwork {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SequencerNetwork for StalledNetwork {
        async fn request(
            &self,
            _to: &PeerAddress,
            _message: SequencerWireMessage,
        ) -> Result<SequencerWireMessage, NetworkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn send(&self, _to: &PeerAddress, _message: SequencerWireMessage) -> Result<(), NetworkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct StepTime(AtomicU64);

    impl PhysicalTimeEffects for StepTime {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn sequencer(config: SequencerConfig) -> (Sequencer, Arc<StepTime>) {
        let time = Arc::new(StepTime::default());
        let seq = Sequencer::new(config, Arc::new(MemoryStorageHandler::new()), time.clone()).unwrap();
        (seq, time)
    }

    fn generate(client: i64, dependency: CausalityClock) -> GenerateTimestampRequest {
        GenerateTimestampRequest {
            dependency,
            client_timestamp: Timestamp::new("c", client),
        }
    }

    fn commit(ts: Timestamp, client: i64) -> CommitTsRequest {
        CommitTsRequest {
            version: CausalityClock::new(),
            timestamp: ts,
            client_timestamp: Timestamp::new("c", client),
            commit: true,
            update_groups: Vec::new(),
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        let result = Sequencer::new(
            SequencerConfig::new(""),
            Arc::new(MemoryStorageHandler::new()),
            Arc::new(StepTime::default()),
        );
        assert_matches!(result, Err(SequencerError::Config { .. }));
    }

    #[tokio::test]
    async fn issue_and_commit_without_peers() {
        let (seq, _) = sequencer(SequencerConfig::new("a"));

        let reply = seq.generate_timestamp(generate(1, CausalityClock::new())).await.unwrap();
        let ts = reply.timestamp.unwrap();
        assert_eq!(ts, Timestamp::new("a", 1));
        assert_eq!(seq.lease_count(), 1);

        let reply = seq.commit_ts(commit(ts.clone(), 1)).await.unwrap();
        assert!(reply.is_ok());
        assert!(reply.current_clock.includes(&ts));
        assert!(reply.stable_clock.includes(&ts), "no peers: stable at once");
        assert_eq!(seq.lease_count(), 0);
        assert_eq!(seq.replication_backlog(), 0);

        // Duplicate commit
        let again = seq.commit_ts(commit(ts, 2)).await.unwrap();
        assert_eq!(again.status, CommitTsStatus::Failed);
    }

    #[tokio::test]
    async fn finalized_client_request_gets_no_timestamp() {
        let (seq, _) = sequencer(SequencerConfig::new("a"));
        let ts = seq
            .generate_timestamp(generate(1, CausalityClock::new()))
            .await
            .unwrap()
            .timestamp
            .unwrap();
        seq.commit_ts(commit(ts, 1)).await.unwrap();

        let retry = seq.generate_timestamp(generate(1, CausalityClock::new())).await.unwrap();
        assert_eq!(retry.timestamp, None);
        assert_eq!(retry.client_latest_counter, 1);
    }

    #[tokio::test]
    async fn abandon_finalizes_as_unused() {
        let (seq, _) = sequencer(SequencerConfig::new("a"));
        let ts = seq
            .generate_timestamp(generate(1, CausalityClock::new()))
            .await
            .unwrap()
            .timestamp
            .unwrap();

        let mut request = commit(ts.clone(), 1);
        request.commit = false;
        assert!(seq.commit_ts(request).await.unwrap().is_ok());
        assert!(seq.current_clock().includes(&ts));
        assert!(seq.not_used_clock().includes(&ts));
        assert!(seq.last_commit_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backup_refuses_client_requests() {
        let (seq, _) = sequencer(SequencerConfig::new("a").as_backup());
        assert_matches!(
            seq.generate_timestamp(generate(1, CausalityClock::new())).await,
            Err(SequencerError::NotPrimary { .. })
        );
        assert_matches!(seq.latest_known_clock(), Err(SequencerError::NotPrimary { .. }));
    }

    #[tokio::test]
    async fn expired_leases_are_swept_and_forgettable() {
        let mut config = SequencerConfig::new("a");
        config.txn_id_lifetime_ms = 100;
        let (seq, time) = sequencer(config);

        let ts = seq
            .generate_timestamp(generate(1, CausalityClock::new()))
            .await
            .unwrap()
            .timestamp
            .unwrap();
        time.0.store(201, Ordering::SeqCst);

        assert_eq!(seq.sweep_expired_leases().await, vec![ts.clone()]);
        assert!(seq.current_clock().includes(&ts));
        assert!(seq.expired_clock().includes(&ts));

        // The client's late commit finds no lease
        let late = seq.commit_ts(commit(ts.clone(), 1)).await.unwrap();
        assert_eq!(late.status, CommitTsStatus::Failed);

        assert!(seq.forget_unused_timestamp(&ts).await);
        assert!(!seq.current_clock().includes(&ts));
        assert!(!seq.forget_unused_timestamp(&ts).await);
    }

    #[tokio::test]
    async fn replies_are_not_answered() {
        let (seq, _) = sequencer(SequencerConfig::new("a"));
        let message = SequencerWireMessage::new(SequencerPayload::LatestKnownClockReply(
            LatestKnownClockReply {
                current_clock: CausalityClock::new(),
                stable_clock: CausalityClock::new(),
            },
        ));
        assert!(seq.handle_message(message).await.is_none());
    }

    async fn issue(seq: &Sequencer, client: i64) -> Timestamp {
        seq.generate_timestamp(generate(client, CausalityClock::new()))
            .await
            .unwrap()
            .timestamp
            .unwrap()
    }

    #[tokio::test]
    async fn stalled_backup_does_not_hold_up_commits() {
        let network = Arc::new(StalledNetwork::default());
        let (seq, _) = sequencer(SequencerConfig::new("a").with_backup("a-backup"));
        let seq = seq.with_network(network.clone());

        for client in 1..=2 {
            let ts = issue(&seq, client).await;
            let reply = tokio::time::timeout(Duration::from_secs(5), seq.commit_ts(commit(ts, client)))
                .await
                .expect("commit waited on the backup link")
                .unwrap();
            assert!(reply.is_ok());
        }

        for _ in 0..10 {
            if network.attempts.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(network.attempts.load(Ordering::SeqCst), 2);
        assert!(seq.current_clock().includes(&Timestamp::new("a", 2)));
    }

    #[tokio::test]
    async fn silent_peer_keeps_record_queued() {
        let network = Arc::new(StalledNetwork::default());
        let mut config = SequencerConfig::new("a").with_peers(["b"]);
        config.peer_request_timeout_ms = 10;
        let (seq, _) = sequencer(config);
        let seq = seq.with_network(network.clone());

        let ts = issue(&seq, 1).await;
        assert!(seq.commit_ts(commit(ts.clone(), 1)).await.unwrap().is_ok());

        assert_eq!(seq.anti_entropy_round().await, 1);
        assert_eq!(network.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(seq.replication_backlog(), 1);
        assert!(!seq.stable_clock().includes(&ts), "unacknowledged record is not stable");
    }

    #[tokio::test]
    async fn backup_answers_only_replication_messages() {
        let (seq, _) = sequencer(SequencerConfig::new("a").as_backup());

        let latest =
            SequencerWireMessage::new(SequencerPayload::LatestKnownClock(LatestKnownClockRequest {}));
        assert!(seq.handle_message(latest).await.is_none());

        let update = SequencerWireMessage::new(SequencerPayload::SeqCommitUpdates(
            SeqCommitUpdatesRequest {
                origin_site: SiteId::new("a"),
                base_timestamp: Timestamp::new("a", 1),
                client_timestamp: Timestamp::new("c", 1),
                update_groups: Vec::new(),
                sender_clock: CausalityClock::new(),
                not_used: CausalityClock::new(),
            },
        ));
        let reply = seq.handle_message(update).await.unwrap();
        assert_matches!(reply.payload, SequencerPayload::SeqCommitUpdatesReply(_));
        assert!(seq.current_clock().includes(&Timestamp::new("a", 1)));
    }

    #[tokio::test]
    async fn max_remote_clock_joins_every_peer() {
        let (seq, _) = sequencer(SequencerConfig::new("a").with_peers(["b", "c"]));

        for (origin, counter) in [("b", 3), ("c", 2)] {
            let base = Timestamp::new(origin, counter);
            let mut sender_clock = CausalityClock::new();
            sender_clock.record_all_until(&base);
            seq.seq_commit_updates(SeqCommitUpdatesRequest {
                origin_site: SiteId::new(origin),
                base_timestamp: base,
                client_timestamp: Timestamp::new("c", 1),
                update_groups: Vec::new(),
                sender_clock,
                not_used: CausalityClock::new(),
            })
            .await;
        }

        let max_remote = seq.max_remote_clock();
        assert!(max_remote.includes(&Timestamp::new("b", 3)));
        assert!(max_remote.includes(&Timestamp::new("c", 2)));
        assert!(!max_remote.includes(&Timestamp::new("b", 4)));
        assert!(seq
            .remote_clock(&SiteId::new("c"))
            .is_some_and(|clock| !clock.has_event_from(&SiteId::new("b"))));
    }
}
