//! Anti-entropy propagation of local commits to peer sequencers.
//!
//! Every local commit record stays in its origin queue until each configured
//! peer has acknowledged it. A round resends the least-recently-sent due
//! record of each queue to the peers still missing it; unanswered sends are
//! retried after the inter-sequencer backoff.

use crate::record::CommitRecord;
use crate::sequencer::Sequencer;
use crate::wire::{SequencerPayload, SequencerWireMessage};
use futures::future::join_all;
use meridian_core::effects::NetworkError;
use meridian_core::messages::{SeqCommitUpdatesReply, SeqCommitUpdatesRequest};
use meridian_core::{CausalityClock, Timestamp};
use tracing::{debug, info, warn};

struct Outgoing {
    ts: Timestamp,
    request: SeqCommitUpdatesRequest,
    missing: Vec<usize>,
}

impl Sequencer {
    /// Run one propagation round. Returns how many records were sent.
    pub async fn anti_entropy_round(&self) -> usize {
        if self.config.peers.is_empty() {
            return 0;
        }
        let Some(network) = self.network.clone() else {
            debug!("peers configured without a network, skipping propagation");
            return 0;
        };

        let now = self.time.now_ms();
        let retry = self.config.inter_sequencer_retry_ms;
        let sender_clock = self.state.lock().received.clone();

        let batch: Vec<Outgoing> = {
            let mut ops = self.ops.lock();
            let mut batch = Vec::new();
            for queue in ops.values_mut() {
                queue.retain(|record| {
                    let done = record.acked.is_complete();
                    if done {
                        info!(ts = %record.base_timestamp, "commit record acknowledged by every peer");
                    }
                    !done
                });

                let next = queue
                    .iter_mut()
                    .filter(|record| record.is_due(now, retry))
                    .min_by_key(|record| record.last_sent_ms);
                if let Some(record) = next {
                    record.last_sent_ms = Some(now);
                    batch.push(outgoing(record, self, sender_clock.clone()));
                }
            }
            ops.retain(|_, queue| !queue.is_empty());
            batch
        };

        let timeout = self.config.peer_request_timeout();
        let timeout_ms = self.config.peer_request_timeout_ms;
        for item in &batch {
            let sends = item.missing.iter().filter_map(|&slot| {
                let peer = self.config.peers.get(slot)?.clone();
                let network = network.clone();
                let message =
                    SequencerWireMessage::new(SequencerPayload::SeqCommitUpdates(item.request.clone()));
                Some(async move {
                    let outcome = tokio::time::timeout(timeout, network.request(&peer, message))
                        .await
                        .unwrap_or_else(|_| {
                            Err(NetworkError::Timeout {
                                peer: peer.to_string(),
                                timeout_ms,
                            })
                        });
                    (slot, peer, outcome)
                })
            });

            for (slot, peer, outcome) in join_all(sends).await {
                match outcome {
                    Ok(reply) => match reply.into_seq_commit_updates_reply() {
                        Some(ack) => self.on_replication_ack(&item.ts, slot, ack),
                        None => warn!(peer = %peer, "unexpected reply to commit record"),
                    },
                    Err(e) => {
                        debug!(peer = %peer, ts = %item.ts, error = %e, "commit record not delivered");
                    }
                }
            }
        }
        batch.len()
    }

    fn on_replication_ack(&self, ts: &Timestamp, slot: usize, ack: SeqCommitUpdatesReply) {
        let complete = self
            .ops
            .lock()
            .get_mut(ts.site_id())
            .and_then(|queue| queue.iter_mut().find(|r| &r.base_timestamp == ts))
            .map(|record| {
                record.acked.ack(slot);
                record.acked.is_complete()
            });

        // Stable once any peer holds the record
        self.state.lock().stable.record(ts);
        self.remote.lock().observe(&ack.site_id, &ack.current_clock);

        if complete == Some(true) {
            debug!(ts = %ts, "last acknowledgement received");
        }
    }
}

fn outgoing(
    record: &CommitRecord,
    sequencer: &Sequencer,
    sender_clock: CausalityClock,
) -> Outgoing {
    Outgoing {
        ts: record.base_timestamp.clone(),
        request: record.to_request(sequencer.site_id(), sender_clock),
        missing: record.acked.missing(),
    }
}
