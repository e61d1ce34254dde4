//! Client transaction manager.
//!
//! Transactions commit locally first and become visible to later transactions
//! of the same client immediately. A single drain loop then turns the queue of
//! locally committed transactions into globally committed ones, strictly in
//! local commit order, by promoting each transaction's local dependencies and
//! obtaining a global timestamp from the sequencer.

use crate::client::SequencerClient;
use crate::error::TxnError;
use crate::handle::{FnCommitListener, TransactionHandle};
use meridian_core::messages::{CommitTsRequest, GenerateTimestampRequest};
use meridian_core::{CausalityClock, CmpClock, IncrementalTimestampGenerator, SiteId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Transaction manager configuration
#[derive(Debug, Clone)]
pub struct TxnManagerConfig {
    /// Client identity; also the site of client timestamps
    pub client_id: SiteId,
    /// Commit attempts before giving up on a transaction
    pub max_commit_attempts: u32,
}

impl TxnManagerConfig {
    /// Configuration for the given client with default limits
    pub fn new(client_id: impl Into<SiteId>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

impl Default for TxnManagerConfig {
    fn default() -> Self {
        Self {
            client_id: SiteId::from("client"),
            max_commit_attempts: 5,
        }
    }
}

struct ManagerState {
    committed_clock: CausalityClock,
    local_generator: IncrementalTimestampGenerator,
    client_generator: IncrementalTimestampGenerator,
    locally_committed: VecDeque<Arc<TransactionHandle>>,
}

/// Begins transactions and drives them to global commit.
pub struct TxnManager {
    config: TxnManagerConfig,
    sequencer: Arc<dyn SequencerClient>,
    state: Mutex<ManagerState>,
    commit_gate: async_lock::Mutex<()>,
}

impl TxnManager {
    /// Create a manager talking to `sequencer`
    pub fn new(config: TxnManagerConfig, sequencer: Arc<dyn SequencerClient>) -> Self {
        let local_site = SiteId::new(format!("{}:local", config.client_id));
        let state = ManagerState {
            committed_clock: CausalityClock::new(),
            local_generator: IncrementalTimestampGenerator::new(local_site),
            client_generator: IncrementalTimestampGenerator::new(config.client_id.clone()),
            locally_committed: VecDeque::new(),
        };
        Self {
            config,
            sequencer,
            state: Mutex::new(state),
            commit_gate: async_lock::Mutex::new(()),
        }
    }

    /// Client identity
    pub fn client_id(&self) -> &SiteId {
        &self.config.client_id
    }

    /// Globally committed history visible to new transactions
    pub fn committed_clock(&self) -> CausalityClock {
        self.state.lock().committed_clock.clone()
    }

    /// Locally committed transactions still waiting for a global timestamp
    pub fn pending_global_commits(&self) -> usize {
        self.state.lock().locally_committed.len()
    }

    /// Fold the sequencer's stable clock into the snapshot new transactions
    /// read from.
    pub async fn refresh_committed_clock(&self) -> Result<CmpClock, TxnError> {
        let reply = self.sequencer.latest_known_clock().await?;
        Ok(self.state.lock().committed_clock.merge(&reply.stable_clock))
    }

    /// Open a transaction over the committed snapshot plus every locally
    /// committed update transaction not yet globally committed.
    pub fn begin(&self) -> Arc<TransactionHandle> {
        let mut state = self.state.lock();
        let local_timestamp = state.local_generator.generate_new();
        let local_visible: Vec<_> = state
            .locally_committed
            .iter()
            .filter(|txn| !txn.is_read_only())
            .cloned()
            .collect();
        debug!(txn = %local_timestamp, local_deps = local_visible.len(), "begin transaction");
        Arc::new(TransactionHandle::new(
            local_timestamp,
            state.committed_clock.clone(),
            local_visible,
        ))
    }

    /// Commit locally and queue for global commit without waiting.
    pub fn commit_local(&self, txn: &Arc<TransactionHandle>) -> Result<(), TxnError> {
        txn.mark_locally_committed()?;
        self.state.lock().locally_committed.push_back(txn.clone());
        Ok(())
    }

    /// Commit and wait until the transaction is globally committed.
    ///
    /// Replaces any commit listener already installed on the handle.
    pub async fn commit(&self, txn: &Arc<TransactionHandle>) -> Result<(), TxnError> {
        let (tx, rx) = oneshot::channel();
        let permit = Mutex::new(Some(tx));
        txn.set_commit_listener(Arc::new(FnCommitListener::new(
            move |_: &TransactionHandle| {
                if let Some(tx) = permit.lock().take() {
                    let _ = tx.send(());
                }
            },
        )))?;

        self.commit_local(txn)?;
        self.drain_committed().await?;
        rx.await
            .map_err(|_| TxnError::sequencer("transaction dropped before global commit"))
    }

    /// Globally commit every queued transaction in local commit order.
    ///
    /// Stops at the first transaction that cannot be committed; it stays at
    /// the head of the queue for the next drain. Returns how many
    /// transactions were committed.
    pub async fn drain_committed(&self) -> Result<usize, TxnError> {
        let _gate = self.commit_gate.lock().await;
        let mut committed = 0;
        loop {
            let head = self.state.lock().locally_committed.front().cloned();
            let Some(txn) = head else {
                break;
            };
            self.commit_global(&txn).await?;
            self.state.lock().locally_committed.pop_front();
            committed += 1;
        }
        Ok(committed)
    }

    async fn commit_global(&self, txn: &TransactionHandle) -> Result<(), TxnError> {
        while txn.local_visible_count() > 0 {
            txn.mark_first_local_visible_transaction_global()?;
        }

        if txn.is_read_only() {
            return txn.mark_globally_committed();
        }

        let dependency = txn.global_visible_clock();
        let attempts = self.config.max_commit_attempts;
        for attempt in 1..=attempts {
            let client_timestamp = self.state.lock().client_generator.generate_new();
            let reply = self
                .sequencer
                .generate_timestamp(GenerateTimestampRequest {
                    dependency: dependency.clone(),
                    client_timestamp: client_timestamp.clone(),
                })
                .await?;

            let Some(ts) = reply.timestamp else {
                warn!(
                    client_ts = %client_timestamp,
                    latest = reply.client_latest_counter,
                    "sequencer already finalized this client timestamp"
                );
                self.state
                    .lock()
                    .client_generator
                    .skip_past(reply.client_latest_counter);
                continue;
            };

            txn.set_global_timestamp(ts.clone())?;
            let reply = self
                .sequencer
                .commit_ts(CommitTsRequest {
                    version: dependency.clone(),
                    timestamp: ts.clone(),
                    client_timestamp,
                    commit: true,
                    update_groups: txn.global_operations()?,
                })
                .await?;

            if reply.is_ok() {
                {
                    let mut state = self.state.lock();
                    state.committed_clock.merge(&reply.stable_clock);
                    state.committed_clock.record(&ts);
                }
                debug!(local = %txn.local_timestamp(), global = %ts, "transaction globally committed");
                return txn.mark_globally_committed();
            }
            warn!(attempt, ts = %ts, "commit rejected by sequencer, retrying with a fresh timestamp");
        }
        Err(TxnError::CommitRejected { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TxnStatus;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use meridian_core::messages::{
        CommitTsReply, CommitTsStatus, GenerateTimestampReply, LatestKnownClockReply,
    };
    use meridian_core::{ObjectId, Timestamp, UpdateOperation};

    #[derive(Default)]
    struct FakeState {
        next: i64,
        reject_commits: u32,
        current: CausalityClock,
        client_clock: CausalityClock,
        commits: Vec<CommitTsRequest>,
    }

    #[derive(Default)]
    struct FakeSequencer {
        state: Mutex<FakeState>,
    }

    impl FakeSequencer {
        fn rejecting(count: u32) -> Self {
            let fake = Self::default();
            fake.state.lock().reject_commits = count;
            fake
        }

        fn commits(&self) -> Vec<CommitTsRequest> {
            self.state.lock().commits.clone()
        }
    }

    #[async_trait]
    impl SequencerClient for FakeSequencer {
        async fn generate_timestamp(
            &self,
            request: GenerateTimestampRequest,
        ) -> Result<GenerateTimestampReply, TxnError> {
            let mut state = self.state.lock();
            let site = request.client_timestamp.site_id().clone();
            let client_latest_counter = state.client_clock.get_latest_counter(&site);
            if state.client_clock.includes(&request.client_timestamp) {
                return Ok(GenerateTimestampReply {
                    timestamp: None,
                    client_latest_counter,
                });
            }
            state.next += 1;
            Ok(GenerateTimestampReply {
                timestamp: Some(Timestamp::new("dc", state.next)),
                client_latest_counter,
            })
        }

        async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, TxnError> {
            let mut state = self.state.lock();
            state.client_clock.record(&request.client_timestamp);
            let status = if state.reject_commits > 0 {
                state.reject_commits -= 1;
                CommitTsStatus::Failed
            } else {
                state.current.record(&request.timestamp);
                state.commits.push(request);
                CommitTsStatus::Ok
            };
            Ok(CommitTsReply {
                status,
                current_clock: state.current.clone(),
                stable_clock: state.current.clone(),
            })
        }

        async fn latest_known_clock(&self) -> Result<LatestKnownClockReply, TxnError> {
            let state = self.state.lock();
            Ok(LatestKnownClockReply {
                current_clock: state.current.clone(),
                stable_clock: state.current.clone(),
            })
        }
    }

    fn write(txn: &TransactionHandle, key: &str) {
        let ts = txn.next_timestamp().unwrap();
        txn.register_operation(ObjectId::new("t", key), UpdateOperation::new(ts, vec![7]))
            .unwrap();
    }

    fn manager(sequencer: Arc<FakeSequencer>) -> TxnManager {
        TxnManager::new(TxnManagerConfig::new("c1"), sequencer)
    }

    #[tokio::test]
    async fn commit_waits_for_global_timestamp() {
        let sequencer = Arc::new(FakeSequencer::default());
        let manager = manager(sequencer.clone());

        let txn = manager.begin();
        write(&txn, "k");
        manager.commit(&txn).await.unwrap();

        assert_eq!(txn.status(), TxnStatus::CommittedGlobal);
        assert_eq!(txn.global_timestamp(), Some(Timestamp::new("dc", 1)));
        assert!(manager.committed_clock().includes(&Timestamp::new("dc", 1)));

        let commits = sequencer.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].client_timestamp, Timestamp::new("c1", 1));
        assert_eq!(
            commits[0].update_groups[0].base_timestamp(),
            &Timestamp::new("dc", 1)
        );
    }

    #[tokio::test]
    async fn local_dependencies_promoted_in_order() {
        let sequencer = Arc::new(FakeSequencer::default());
        let manager = manager(sequencer.clone());

        let first = manager.begin();
        write(&first, "k");
        manager.commit_local(&first).unwrap();

        let second = manager.begin();
        assert_eq!(second.local_visible_count(), 1);
        write(&second, "k");
        manager.commit_local(&second).unwrap();
        assert_eq!(manager.pending_global_commits(), 2);

        assert_eq!(manager.drain_committed().await.unwrap(), 2);
        assert_eq!(manager.pending_global_commits(), 0);

        let commits = sequencer.commits();
        let dependency = commits[1].update_groups[0].dependency();
        assert!(dependency.includes(&Timestamp::new("dc", 1)));
        assert!(!dependency.includes(first.local_timestamp()));
        assert!(commits[1].version.includes(&Timestamp::new("dc", 1)));
    }

    #[tokio::test]
    async fn failed_commit_retries_with_fresh_timestamps() {
        let sequencer = Arc::new(FakeSequencer::rejecting(1));
        let manager = manager(sequencer.clone());

        let txn = manager.begin();
        write(&txn, "k");
        manager.commit(&txn).await.unwrap();

        assert_eq!(txn.global_timestamp(), Some(Timestamp::new("dc", 2)));
        assert_eq!(sequencer.commits()[0].client_timestamp, Timestamp::new("c1", 2));
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let sequencer = Arc::new(FakeSequencer::rejecting(10));
        let manager = TxnManager::new(
            TxnManagerConfig {
                client_id: SiteId::from("c1"),
                max_commit_attempts: 3,
            },
            sequencer,
        );

        let txn = manager.begin();
        write(&txn, "k");
        manager.commit_local(&txn).unwrap();
        assert_matches!(
            manager.drain_committed().await,
            Err(TxnError::CommitRejected { attempts: 3 })
        );
        assert_eq!(txn.status(), TxnStatus::CommittedLocal);
        assert_eq!(manager.pending_global_commits(), 1);
    }

    #[tokio::test]
    async fn read_only_transactions_skip_the_sequencer() {
        let sequencer = Arc::new(FakeSequencer::default());
        let manager = manager(sequencer.clone());

        let reader = manager.begin();
        manager.commit_local(&reader).unwrap();
        let writer = manager.begin();
        assert_eq!(writer.local_visible_count(), 0);

        manager.commit(&writer).await.unwrap();
        assert_eq!(reader.status(), TxnStatus::CommittedGlobal);
        assert!(sequencer.commits().is_empty());
    }

    #[tokio::test]
    async fn refresh_merges_stable_clock() {
        let sequencer = Arc::new(FakeSequencer::default());
        sequencer.state.lock().current.record(&Timestamp::new("dc-b", 3));
        let manager = manager(sequencer);

        assert_eq!(
            manager.refresh_committed_clock().await.unwrap(),
            CmpClock::IsDominated
        );
        assert!(manager.committed_clock().includes(&Timestamp::new("dc-b", 3)));
    }
}
