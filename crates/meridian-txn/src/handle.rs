//! Per-transaction state machine.
//!
//! A handle starts `Pending`, collects operations, then moves to
//! `CommittedLocal` once its owner commits. The transaction manager later
//! promotes its locally visible dependencies one by one, assigns a global
//! timestamp and marks it `CommittedGlobal`. A pending handle may instead be
//! rolled back to `Cancelled`.
//!
//! ```text
//! Pending ──commit──▶ CommittedLocal ──global ts──▶ CommittedGlobal
//!    │
//!    └──rollback──▶ Cancelled
//! ```
//!
//! Handles lock only themselves and the handles they depend on, which always
//! committed earlier, so lock order follows commit order.

use crate::error::TxnError;
use meridian_core::{
    CausalityClock, IncrementalTripleTimestampGenerator, ObjectId, ObjectUpdatesGroup, Timestamp,
    TripleTimestamp, UpdateOperation,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Open; operations may be registered
    Pending,
    /// Committed at the client, waiting for a global timestamp
    CommittedLocal,
    /// Committed at a sequencer
    CommittedGlobal,
    /// Rolled back
    Cancelled,
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnStatus::Pending => "PENDING",
            TxnStatus::CommittedLocal => "COMMITTED_LOCAL",
            TxnStatus::CommittedGlobal => "COMMITTED_GLOBAL",
            TxnStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Commit listeners
// =============================================================================

/// Callback fired once a transaction is globally committed.
///
/// Invoked without the handle's lock held, so the listener may query the
/// handle.
pub trait CommitListener: Send + Sync {
    /// Called after the transaction reached `CommittedGlobal`
    fn on_global_commit(&self, txn: &TransactionHandle);
}

/// Logging implementation
pub struct LoggingCommitListener;

impl CommitListener for LoggingCommitListener {
    fn on_global_commit(&self, txn: &TransactionHandle) {
        match txn.global_timestamp() {
            Some(ts) => tracing::debug!(local = %txn.local_timestamp(), global = %ts, "transaction globally committed"),
            None => tracing::debug!(local = %txn.local_timestamp(), "read-only transaction committed"),
        }
    }
}

/// Function-based listener wrapper
pub struct FnCommitListener<F>(F);

impl<F> FnCommitListener<F>
where
    F: Fn(&TransactionHandle) + Send + Sync,
{
    /// Create a new function-based listener
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> CommitListener for FnCommitListener<F>
where
    F: Fn(&TransactionHandle) + Send + Sync,
{
    fn on_global_commit(&self, txn: &TransactionHandle) {
        (self.0)(txn);
    }
}

// =============================================================================
// Transaction handle
// =============================================================================

struct HandleState {
    status: TxnStatus,
    global_visible_clock: CausalityClock,
    local_visible: VecDeque<Arc<TransactionHandle>>,
    timestamp_source: IncrementalTripleTimestampGenerator,
    global_timestamp: Option<Timestamp>,
    updates: BTreeMap<ObjectId, ObjectUpdatesGroup>,
    listener: Option<Arc<dyn CommitListener>>,
}

impl HandleState {
    fn expect_status(&self, expected: TxnStatus) -> Result<(), TxnError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TxnError::IllegalTransactionState {
                expected,
                actual: self.status,
            })
        }
    }

    fn is_read_only(&self) -> bool {
        self.updates.is_empty()
    }

    fn expect_global_timestamp_for_updates(&self) -> Result<(), TxnError> {
        if !self.is_read_only() && self.global_timestamp.is_none() {
            return Err(TxnError::GlobalTimestampMissing);
        }
        Ok(())
    }

    fn all_visible_clock(&self) -> CausalityClock {
        let mut clock = self.global_visible_clock.clone();
        for txn in &self.local_visible {
            clock.record(txn.local_timestamp());
        }
        clock
    }
}

/// A snapshot-isolated transaction.
pub struct TransactionHandle {
    local_timestamp: Timestamp,
    inner: Mutex<HandleState>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TransactionHandle")
            .field("local_timestamp", &self.local_timestamp)
            .field("status", &state.status)
            .field("global_timestamp", &state.global_timestamp)
            .field("local_visible", &state.local_visible.len())
            .field("objects", &state.updates.len())
            .finish()
    }
}

impl TransactionHandle {
    /// Open a transaction reading `global_visible_clock` plus the given
    /// locally committed transactions, oldest first.
    pub fn new(
        local_timestamp: Timestamp,
        global_visible_clock: CausalityClock,
        local_visible: Vec<Arc<TransactionHandle>>,
    ) -> Self {
        Self {
            inner: Mutex::new(HandleState {
                status: TxnStatus::Pending,
                global_visible_clock,
                local_visible: local_visible.into(),
                timestamp_source: IncrementalTripleTimestampGenerator::new(local_timestamp.clone()),
                global_timestamp: None,
                updates: BTreeMap::new(),
                listener: None,
            }),
            local_timestamp,
        }
    }

    /// Stable identity of the transaction
    pub fn local_timestamp(&self) -> &Timestamp {
        &self.local_timestamp
    }

    /// Current lifecycle state
    pub fn status(&self) -> TxnStatus {
        self.inner.lock().status
    }

    /// Global timestamp, once assigned
    pub fn global_timestamp(&self) -> Option<Timestamp> {
        self.inner.lock().global_timestamp.clone()
    }

    /// Snapshot of the globally committed transactions this one reads
    pub fn global_visible_clock(&self) -> CausalityClock {
        self.inner.lock().global_visible_clock.clone()
    }

    /// Global snapshot plus the local timestamps of every locally visible
    /// dependency.
    pub fn all_visible_clock(&self) -> CausalityClock {
        self.inner.lock().all_visible_clock()
    }

    /// Number of locally visible dependencies not yet promoted
    pub fn local_visible_count(&self) -> usize {
        self.inner.lock().local_visible.len()
    }

    /// Whether no operation has been registered
    pub fn is_read_only(&self) -> bool {
        self.inner.lock().is_read_only()
    }

    /// Next operation timestamp.
    pub fn next_timestamp(&self) -> Result<TripleTimestamp, TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;
        Ok(state.timestamp_source.generate_new())
    }

    /// Append an operation to the object's group, creating the group on first
    /// use.
    pub fn register_operation(&self, id: ObjectId, op: UpdateOperation) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;

        if !state.updates.contains_key(&id) {
            let dependency = state.all_visible_clock();
            let group =
                ObjectUpdatesGroup::new(id.clone(), self.local_timestamp.clone(), dependency, None);
            state.updates.insert(id.clone(), group);
        }
        if let Some(group) = state.updates.get_mut(&id) {
            group.append(op);
        }
        Ok(())
    }

    /// Register the creation of an object. Must precede every other operation
    /// on that object within this transaction.
    pub fn register_object_creation(
        &self,
        id: ObjectId,
        creation_state: Vec<u8>,
    ) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;
        if state.updates.contains_key(&id) {
            return Err(TxnError::CreationAfterUpdates { object: id });
        }

        let dependency = state.all_visible_clock();
        let group = ObjectUpdatesGroup::new(
            id.clone(),
            self.local_timestamp.clone(),
            dependency,
            Some(creation_state),
        );
        state.updates.insert(id, group);
        Ok(())
    }

    /// Install the listener fired on global commit.
    pub fn set_commit_listener(&self, listener: Arc<dyn CommitListener>) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;
        state.listener = Some(listener);
        Ok(())
    }

    /// `Pending -> CommittedLocal`
    pub fn mark_locally_committed(&self) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;
        state.status = TxnStatus::CommittedLocal;
        Ok(())
    }

    /// Assign the global timestamp. Every locally visible dependency must
    /// have been promoted first.
    pub fn set_global_timestamp(&self, ts: Timestamp) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::CommittedLocal)?;
        if !state.local_visible.is_empty() {
            return Err(TxnError::LocalDependencyPending {
                pending: state.local_visible.len(),
            });
        }
        state.global_timestamp = Some(ts);
        Ok(())
    }

    /// Promote the oldest locally visible dependency, which must already be
    /// globally committed.
    ///
    /// Its global timestamp joins the global snapshot and every pending group
    /// swaps its dependency on the local timestamp for the global one.
    pub fn mark_first_local_visible_transaction_global(&self) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::CommittedLocal)?;

        let Some(first) = state.local_visible.front().cloned() else {
            return Err(TxnError::NoLocalDependency);
        };
        let first_status = first.status();
        if first_status != TxnStatus::CommittedGlobal {
            return Err(TxnError::IllegalTransactionState {
                expected: TxnStatus::CommittedGlobal,
                actual: first_status,
            });
        }
        state.local_visible.pop_front();

        // Read-only dependencies have no global timestamp and left no trace.
        if let Some(new_ts) = first.global_timestamp() {
            let old_ts = first.local_timestamp();
            state.global_visible_clock.record(&new_ts);
            for group in state.updates.values_mut() {
                group.replace_dependent_timestamp(old_ts, &new_ts);
            }
        }
        Ok(())
    }

    /// `CommittedLocal -> CommittedGlobal`, then fire the listener.
    pub fn mark_globally_committed(&self) -> Result<(), TxnError> {
        let listener = {
            let mut state = self.inner.lock();
            state.expect_status(TxnStatus::CommittedLocal)?;
            state.expect_global_timestamp_for_updates()?;
            if !state.local_visible.is_empty() {
                return Err(TxnError::LocalDependencyPending {
                    pending: state.local_visible.len(),
                });
            }
            state.status = TxnStatus::CommittedGlobal;
            state.listener.take()
        };

        if let Some(listener) = listener {
            listener.on_global_commit(self);
        }
        Ok(())
    }

    /// `Pending -> Cancelled`; registered operations are discarded.
    pub fn rollback(&self) -> Result<(), TxnError> {
        let mut state = self.inner.lock();
        state.expect_status(TxnStatus::Pending)?;
        state.updates.clear();
        state.listener = None;
        state.status = TxnStatus::Cancelled;
        Ok(())
    }

    /// Registered groups, stamped with the local timestamp
    pub fn local_operations(&self) -> Vec<ObjectUpdatesGroup> {
        self.inner.lock().updates.values().cloned().collect()
    }

    /// Registered groups rebased on the global timestamp
    pub fn global_operations(&self) -> Result<Vec<ObjectUpdatesGroup>, TxnError> {
        let state = self.inner.lock();
        state.expect_global_timestamp_for_updates()?;
        let Some(global) = state.global_timestamp.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(state
            .updates
            .values()
            .map(|group| group.with_base_timestamp(global))
            .collect())
    }
}
