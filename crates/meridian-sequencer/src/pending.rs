//! Remote commits waiting for their causal dependencies.
//!
//! A commit record received from a peer is applied once the local current
//! clock covers the dependencies of its update groups and the client's
//! previous transaction is finalized here. Dispatch is at-least-once: an op
//! stays queued until the current clock includes its timestamp and is
//! re-dispatched after a backoff.

use crate::error::SequencerError;
use crate::sequencer::Sequencer;
use async_trait::async_trait;
use meridian_core::messages::{CommitTsRequest, SeqCommitUpdatesRequest};
use meridian_core::CausalityClock;
use tracing::{debug, warn};

/// Applies remote commits to local replicas.
///
/// An implementation is expected to finalize the timestamp on this sequencer
/// once the updates are applied, typically through
/// [`Sequencer::commit_ts`]. Without an applier the sequencer finalizes remote
/// timestamps itself.
#[async_trait]
pub trait ReplicaApplier: Send + Sync {
    async fn apply(&self, request: SeqCommitUpdatesRequest) -> Result<(), SequencerError>;
}

#[derive(Debug, Clone)]
pub(crate) struct PendingOp {
    pub(crate) request: SeqCommitUpdatesRequest,
    pub(crate) last_dispatched_ms: Option<u64>,
}

impl PendingOp {
    fn is_due(&self, now_ms: u64, resend_ms: u64) -> bool {
        self.last_dispatched_ms
            .map_or(true, |sent| now_ms >= sent.saturating_add(resend_ms))
    }

    fn is_applicable(&self, current: &CausalityClock, client: &CausalityClock) -> bool {
        let client_ts = &self.request.client_timestamp;
        current.dominates_or_equals(&dependency_of(&self.request))
            && client.get_latest_counter(client_ts.site_id()) >= client_ts.counter().saturating_sub(1)
    }
}

/// Union of the dependencies of every update group in a record
pub fn dependency_of(request: &SeqCommitUpdatesRequest) -> CausalityClock {
    let mut dependency = CausalityClock::new();
    for group in &request.update_groups {
        dependency.merge(group.dependency());
    }
    dependency
}

impl Sequencer {
    pub(crate) fn add_pending(&self, request: SeqCommitUpdatesRequest) {
        self.state.lock().absorb_not_used(&request.not_used);
        self.pending_ops.lock().push_back(PendingOp {
            request,
            last_dispatched_ms: None,
        });
    }

    /// Dispatch every remote commit whose dependencies are satisfied.
    /// Returns how many were dispatched.
    pub async fn pending_ops_round(&self) -> usize {
        let now = self.time.now_ms();
        let resend = self.config.pending_op_resend_ms;
        let (current, client) = {
            let state = self.state.lock();
            (state.current.clone(), state.client.clone())
        };

        let ready: Vec<SeqCommitUpdatesRequest> = {
            let mut pending = self.pending_ops.lock();
            pending.retain(|op| !current.includes(&op.request.base_timestamp));
            pending
                .iter_mut()
                .filter(|op| op.is_due(now, resend) && op.is_applicable(&current, &client))
                .map(|op| {
                    op.last_dispatched_ms = Some(now);
                    op.request.clone()
                })
                .collect()
        };

        for request in &ready {
            self.dispatch_remote(request.clone()).await;
        }
        ready.len()
    }

    async fn dispatch_remote(&self, request: SeqCommitUpdatesRequest) {
        let ts = request.base_timestamp.clone();
        if let Some(applier) = &self.applier {
            if let Err(e) = applier.apply(request).await {
                warn!(ts = %ts, error = %e, "replica applier failed, will retry");
            }
            return;
        }

        let commit = CommitTsRequest {
            version: dependency_of(&request),
            timestamp: request.base_timestamp,
            client_timestamp: request.client_timestamp,
            commit: true,
            update_groups: request.update_groups,
        };
        match self.enqueue_commit(commit).await {
            Ok(reply) if reply.is_ok() => debug!(ts = %ts, "remote commit applied"),
            Ok(_) => debug!(ts = %ts, "remote commit already finalized"),
            Err(e) => warn!(ts = %ts, error = %e, "remote commit not applied"),
        }
    }
}
