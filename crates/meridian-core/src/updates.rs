//! Operation groups produced by a transaction for a single object.

use crate::clock::CausalityClock;
use crate::identifiers::ObjectId;
use crate::time::{Timestamp, TripleTimestamp};
use serde::{Deserialize, Serialize};

/// One operation on a replicated object, encoded by the object's own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOperation {
    /// Position of the operation within its transaction
    pub timestamp: TripleTimestamp,
    /// Type-specific encoding of the operation
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl UpdateOperation {
    /// Create an operation
    pub fn new(timestamp: TripleTimestamp, payload: Vec<u8>) -> Self {
        Self { timestamp, payload }
    }
}

/// All operations a transaction applied to one object, tagged with the
/// transaction's base timestamp and the causal snapshot they depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUpdatesGroup {
    target: ObjectId,
    base_timestamp: Timestamp,
    dependency: CausalityClock,
    #[serde(default)]
    creation_state: Option<Vec<u8>>,
    operations: Vec<UpdateOperation>,
}

impl ObjectUpdatesGroup {
    /// Create an empty group
    pub fn new(
        target: ObjectId,
        base_timestamp: Timestamp,
        dependency: CausalityClock,
        creation_state: Option<Vec<u8>>,
    ) -> Self {
        Self {
            target,
            base_timestamp,
            dependency,
            creation_state,
            operations: Vec::new(),
        }
    }

    /// Append an operation
    pub fn append(&mut self, op: UpdateOperation) {
        self.operations.push(op);
    }

    /// Object the operations apply to
    pub fn target(&self) -> &ObjectId {
        &self.target
    }

    /// Timestamp of the transaction that produced the group
    pub fn base_timestamp(&self) -> &Timestamp {
        &self.base_timestamp
    }

    /// Causal snapshot the operations were generated against
    pub fn dependency(&self) -> &CausalityClock {
        &self.dependency
    }

    /// Initial object state when the transaction created the object
    pub fn creation_state(&self) -> Option<&[u8]> {
        self.creation_state.as_deref()
    }

    /// Whether the transaction created the object
    pub fn has_creation_state(&self) -> bool {
        self.creation_state.is_some()
    }

    /// Operations in generation order
    pub fn operations(&self) -> &[UpdateOperation] {
        &self.operations
    }

    /// Whether the group holds neither operations nor a creation state
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.creation_state.is_none()
    }

    /// Copy of the group rebased onto `base`; every operation keeps its
    /// position in the transaction.
    pub fn with_base_timestamp(&self, base: &Timestamp) -> ObjectUpdatesGroup {
        ObjectUpdatesGroup {
            target: self.target.clone(),
            base_timestamp: base.clone(),
            dependency: self.dependency.clone(),
            creation_state: self.creation_state.clone(),
            operations: self
                .operations
                .iter()
                .map(|op| UpdateOperation {
                    timestamp: op.timestamp.with_base_timestamp(base.clone()),
                    payload: op.payload.clone(),
                })
                .collect(),
        }
    }

    /// Substitute a dependency on `old` by a dependency on `new`. Used when a
    /// locally committed dependency receives its global timestamp.
    pub fn replace_dependent_timestamp(&mut self, old: &Timestamp, new: &Timestamp) {
        self.dependency.drop_timestamp(old);
        self.dependency.record(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::IncrementalTripleTimestampGenerator;

    #[test]
    fn rebase_rewrites_every_operation() {
        let local = Timestamp::new("client:local", 3);
        let mut gen = IncrementalTripleTimestampGenerator::new(local.clone());
        let mut group = ObjectUpdatesGroup::new(
            ObjectId::new("t", "k"),
            local,
            CausalityClock::new(),
            None,
        );
        group.append(UpdateOperation::new(gen.generate_new(), vec![1]));
        group.append(UpdateOperation::new(gen.generate_new(), vec![2]));

        let global = Timestamp::new("dc", 8);
        let rebased = group.with_base_timestamp(&global);
        assert_eq!(rebased.base_timestamp(), &global);
        for (i, op) in rebased.operations().iter().enumerate() {
            assert_eq!(op.timestamp.base(), &global);
            assert_eq!(op.timestamp.secondary(), i as i64 + 1);
        }
    }

    #[test]
    fn replace_dependency() {
        let mut dep = CausalityClock::new();
        let old = Timestamp::new("client:local", 1);
        dep.record(&old);
        dep.record(&Timestamp::new("dc", 1));
        let mut group = ObjectUpdatesGroup::new(
            ObjectId::new("t", "k"),
            Timestamp::new("client:local", 2),
            dep,
            None,
        );

        let new = Timestamp::new("dc", 2);
        group.replace_dependent_timestamp(&old, &new);
        assert!(!group.dependency().includes(&old));
        assert!(group.dependency().includes(&new));
        assert!(group.dependency().includes(&Timestamp::new("dc", 1)));
    }
}
