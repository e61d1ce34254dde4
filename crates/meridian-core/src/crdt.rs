//! Contract replicated data types satisfy to receive committed updates.

use crate::updates::{ObjectUpdatesGroup, UpdateOperation};

/// Failure to apply an update or merge two replicas.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrdtError {
    /// Operation payload could not be decoded for this type
    #[error("Malformed operation: {message}")]
    MalformedOperation {
        /// Decoding failure description
        message: String,
    },

    /// Creation state could not be decoded for this type
    #[error("Malformed state: {message}")]
    MalformedState {
        /// Decoding failure description
        message: String,
    },
}

impl CrdtError {
    /// Create a malformed operation error
    pub fn malformed_operation(message: impl Into<String>) -> Self {
        Self::MalformedOperation {
            message: message.into(),
        }
    }

    /// Create a malformed state error
    pub fn malformed_state(message: impl Into<String>) -> Self {
        Self::MalformedState {
            message: message.into(),
        }
    }
}

/// A replicated object.
///
/// Operations carry their own [`crate::time::TripleTimestamp`] so
/// implementations can order or deduplicate concurrent updates.
pub trait ReplicatedObject: Clone + Send + Sync {
    /// Apply a single operation
    fn apply_update(&mut self, op: &UpdateOperation) -> Result<(), CrdtError>;

    /// Join another replica's state into this one
    fn merge(&mut self, other: &Self) -> Result<(), CrdtError>;

    /// Apply every operation of a group in order
    fn apply_group(&mut self, group: &ObjectUpdatesGroup) -> Result<(), CrdtError> {
        for op in group.operations() {
            self.apply_update(op)?;
        }
        Ok(())
    }
}
