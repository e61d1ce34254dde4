//! Client transactions committed through real sequencers.

use assert_matches::assert_matches;
use async_trait::async_trait;
use meridian_core::messages::{
    CommitTsReply, CommitTsRequest, GenerateTimestampReply, GenerateTimestampRequest,
    LatestKnownClockReply,
};
use meridian_core::{ObjectId, Timestamp};
use meridian_sequencer::{ReplicaApplier, SequencerConfig};
use meridian_testkit::{
    init_test_tracing, CounterObject, CounterReplica, LocalSequencerClient, SequencerCluster,
    WireSequencerClient,
};
use meridian_txn::{
    SequencerClient, TransactionHandle, TxnError, TxnManager, TxnManagerConfig, TxnStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn hits() -> ObjectId {
    ObjectId::new("counters", "hits")
}

fn increment(txn: &TransactionHandle, delta: i64) {
    let ts = txn.next_timestamp().unwrap();
    txn.register_operation(hits(), CounterObject::operation(ts, delta))
        .unwrap();
}

#[tokio::test]
async fn transaction_commits_globally() {
    init_test_tracing();
    let cluster = SequencerCluster::with_configs(vec![SequencerConfig::new("dc-a")]);
    let seq = cluster.sequencer("dc-a");
    let manager = TxnManager::new(
        TxnManagerConfig::new("client-1"),
        LocalSequencerClient::new(seq.clone()),
    );

    let txn = manager.begin();
    increment(&txn, 3);
    manager.commit(&txn).await.unwrap();

    assert_eq!(txn.status(), TxnStatus::CommittedGlobal);
    assert_eq!(txn.global_timestamp(), Some(Timestamp::new("dc-a", 1)));
    assert!(seq.current_clock().includes(&Timestamp::new("dc-a", 1)));
    assert!(manager.committed_clock().includes(&Timestamp::new("dc-a", 1)));

    let record = seq.last_commit_record().await.unwrap().unwrap();
    assert_eq!(record.update_groups.len(), 1);
    assert_eq!(
        record.update_groups[0].operations()[0].timestamp.base(),
        &Timestamp::new("dc-a", 1)
    );
}

#[tokio::test]
async fn locally_committed_chain_is_promoted_in_order() {
    let cluster = SequencerCluster::with_configs(vec![SequencerConfig::new("dc-a")]);
    let seq = cluster.sequencer("dc-a");
    let manager = TxnManager::new(
        TxnManagerConfig::new("client-1"),
        LocalSequencerClient::new(seq.clone()),
    );

    let first = manager.begin();
    increment(&first, 1);
    manager.commit_local(&first).unwrap();

    let second = manager.begin();
    assert_eq!(second.local_visible_count(), 1);
    increment(&second, 1);
    manager.commit_local(&second).unwrap();

    assert_eq!(manager.drain_committed().await.unwrap(), 2);
    assert_eq!(first.global_timestamp(), Some(Timestamp::new("dc-a", 1)));
    assert_eq!(second.global_timestamp(), Some(Timestamp::new("dc-a", 2)));

    let record = seq.last_commit_record().await.unwrap().unwrap();
    assert_eq!(record.base_timestamp, Timestamp::new("dc-a", 2));
    assert!(record.update_groups[0]
        .dependency()
        .includes(&Timestamp::new("dc-a", 1)));
}

#[tokio::test]
async fn transactions_over_the_wire() {
    let cluster = SequencerCluster::with_configs(vec![SequencerConfig::new("dc-a")]);
    let manager = TxnManager::new(
        TxnManagerConfig::new("client-1"),
        WireSequencerClient::new(cluster.network.clone(), "dc-a"),
    );

    for _ in 0..3 {
        let txn = manager.begin();
        increment(&txn, 1);
        manager.commit(&txn).await.unwrap();
    }

    let stable = manager.refresh_committed_clock().await.unwrap();
    assert!(stable.is_dominates_or_equals());
    assert!(manager
        .committed_clock()
        .includes(&Timestamp::new("dc-a", 3)));
    assert_eq!(cluster.network.delivered_to("dc-a"), 7);
}

#[tokio::test]
async fn updates_reach_remote_replicas() {
    let replica = CounterReplica::new();
    let mut cluster =
        SequencerCluster::with_configs(vec![SequencerConfig::new("dc-a").with_peers(["dc-b"])]);
    let remote = cluster.add_site(
        "dc-b",
        SequencerConfig::new("dc-b").with_peers(["dc-a"]),
        Some(replica.clone() as Arc<dyn ReplicaApplier>),
    );
    replica.attach(&remote);

    let manager = TxnManager::new(
        TxnManagerConfig::new("client-1"),
        LocalSequencerClient::new(cluster.sequencer("dc-a")),
    );
    for delta in [2, 3] {
        let txn = manager.begin();
        increment(&txn, delta);
        manager.commit(&txn).await.unwrap();
    }

    cluster.settle(10).await;

    assert_eq!(replica.value(&hits()), 5);
    assert!(remote.current_clock().includes(&Timestamp::new("dc-a", 2)));
    assert_eq!(remote.pending_op_count(), 0);
    assert_eq!(cluster.sequencer("dc-a").replication_backlog(), 0);
}

/// Loses the first `drop_commits` CommitTS requests before they arrive.
struct DroppingClient {
    inner: Arc<LocalSequencerClient>,
    drop_commits: AtomicUsize,
}

#[async_trait]
impl SequencerClient for DroppingClient {
    async fn generate_timestamp(
        &self,
        request: GenerateTimestampRequest,
    ) -> Result<GenerateTimestampReply, TxnError> {
        self.inner.generate_timestamp(request).await
    }

    async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, TxnError> {
        let lost = self
            .drop_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(TxnError::sequencer("request lost in transit"));
        }
        self.inner.commit_ts(request).await
    }

    async fn latest_known_clock(&self) -> Result<LatestKnownClockReply, TxnError> {
        self.inner.latest_known_clock().await
    }
}

#[tokio::test]
async fn client_recovers_after_a_lost_commit_expires() {
    let mut config = SequencerConfig::new("dc-a");
    config.txn_id_lifetime_ms = 1_000;
    let cluster = SequencerCluster::with_configs(vec![config]);
    let seq = cluster.sequencer("dc-a");
    let manager = TxnManager::new(
        TxnManagerConfig::new("client-1"),
        Arc::new(DroppingClient {
            inner: LocalSequencerClient::new(seq.clone()),
            drop_commits: AtomicUsize::new(1),
        }),
    );

    let txn = manager.begin();
    increment(&txn, 1);
    manager.commit_local(&txn).unwrap();
    assert_matches!(
        manager.drain_committed().await,
        Err(TxnError::Sequencer { .. })
    );
    assert_eq!(seq.lease_count(), 1);

    cluster.time.advance(2_500);
    assert_eq!(
        seq.sweep_expired_leases().await,
        vec![Timestamp::new("dc-a", 1)]
    );
    assert!(seq
        .client_clock()
        .includes(&Timestamp::new("client-1", 1)));

    assert_eq!(manager.drain_committed().await.unwrap(), 1);
    assert_eq!(txn.status(), TxnStatus::CommittedGlobal);
    assert_eq!(txn.global_timestamp(), Some(Timestamp::new("dc-a", 2)));
    assert_eq!(seq.blocked_request_count(), 0);
}
