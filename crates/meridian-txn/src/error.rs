//! Transaction errors.

use crate::handle::TxnStatus;
use meridian_core::ObjectId;

/// Errors raised by transaction handles and the transaction manager.
///
/// Every variant except [`TxnError::CommitRejected`] and
/// [`TxnError::Sequencer`] is a contract violation by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxnError {
    /// Operation invoked in the wrong transaction state
    #[error("Unexpected transaction status: was {actual}, expected {expected}")]
    IllegalTransactionState {
        /// Status the operation requires
        expected: TxnStatus,
        /// Status the transaction is in
        actual: TxnStatus,
    },

    /// A locally visible dependency has not been promoted yet
    #[error("{pending} locally visible dependencies are not globally committed")]
    LocalDependencyPending {
        /// Dependencies still waiting for promotion
        pending: usize,
    },

    /// Update transaction has no global timestamp yet
    #[error("Global timestamp is not yet defined")]
    GlobalTimestampMissing,

    /// Object creation registered after other operations on the same object
    #[error("Creation of {object} was preceded by another operation")]
    CreationAfterUpdates {
        /// Object being created
        object: ObjectId,
    },

    /// Promotion requested with no locally visible dependency left
    #[error("No locally visible dependency to promote")]
    NoLocalDependency,

    /// Sequencer refused every commit attempt
    #[error("Commit rejected after {attempts} attempts")]
    CommitRejected {
        /// Attempts made
        attempts: u32,
    },

    /// Sequencer could not be reached or replied unexpectedly
    #[error("Sequencer error: {message}")]
    Sequencer {
        /// Failure description
        message: String,
    },
}

impl TxnError {
    /// Create a sequencer error
    pub fn sequencer(message: impl Into<String>) -> Self {
        Self::Sequencer {
            message: message.into(),
        }
    }
}
