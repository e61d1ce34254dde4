//! Background loops of a running sequencer.

use crate::sequencer::Sequencer;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handles of the background loops started by [`Sequencer::start`].
pub struct SequencerTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SequencerTasks {
    /// Number of running loops
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no loop was started
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sequencer task ended abnormally");
            }
        }
    }
}

impl Sequencer {
    /// Spawn the background loops.
    ///
    /// A primary runs anti-entropy, the pending-ops applier and the lease
    /// sweep. A backup only runs the lease sweep.
    pub fn start(self: &Arc<Self>) -> SequencerTasks {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = vec![tokio::spawn(run_maintenance(self.clone(), rx.clone()))];
        if !self.is_backup() {
            handles.push(tokio::spawn(run_anti_entropy(self.clone(), rx.clone())));
            handles.push(tokio::spawn(run_pending_ops(self.clone(), rx)));
        }

        info!(
            site = %self.site_id(),
            backup = self.is_backup(),
            peers = self.config().peers.len(),
            "sequencer started"
        );
        SequencerTasks { shutdown, handles }
    }
}

async fn run_anti_entropy(seq: Arc<Sequencer>, mut shutdown: watch::Receiver<bool>) {
    let idle = seq.config().inter_sequencer_retry();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if seq.anti_entropy_round().await > 0 {
            continue;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = seq.ops_changed.notified() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

async fn run_pending_ops(seq: Arc<Sequencer>, mut shutdown: watch::Receiver<bool>) {
    let idle = seq.config().pending_op_poll();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if seq.pending_ops_round().await > 0 {
            continue;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = seq.pending_changed.notified() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

async fn run_maintenance(seq: Arc<Sequencer>, mut shutdown: watch::Receiver<bool>) {
    let period = seq.config().maintenance_interval();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {
                seq.sweep_expired_leases().await;
                seq.retry_blocked_requests();
                seq.drain_commit_queue().await;
            }
        }
    }
}
