//! Property tests for the counter used as a replicated object in fixtures.

use meridian_core::{ReplicatedObject, Timestamp, TripleTimestamp, UpdateOperation};
use meridian_testkit::strategies::{arb_counter_operation, arb_triple_timestamp};
use meridian_testkit::CounterObject;
use proptest::prelude::*;

fn replica<'a>(ops: impl IntoIterator<Item = &'a UpdateOperation>) -> CounterObject {
    let mut counter = CounterObject::default();
    for op in ops {
        counter.apply_update(op).unwrap();
    }
    counter
}

proptest! {
    /// Property: replicas holding overlapping subsets of one history converge
    /// on the sum of the whole history once merged, in either order
    #[test]
    fn prop_merge_converges(
        history in prop::collection::btree_map(arb_triple_timestamp(), -50i64..50, 0..12),
        placement in prop::collection::vec(0u8..3, 12),
    ) {
        let ops: Vec<UpdateOperation> = history
            .iter()
            .map(|(ts, delta)| CounterObject::operation(ts.clone(), *delta))
            .collect();
        // 0: left only, 1: right only, 2: both
        let left: Vec<_> = ops.iter().zip(&placement).filter(|(_, p)| **p != 1).map(|(op, _)| op).collect();
        let right: Vec<_> = ops.iter().zip(&placement).filter(|(_, p)| **p != 0).map(|(op, _)| op).collect();

        let mut a = replica(left.iter().copied());
        a.merge(&replica(right.iter().copied())).unwrap();
        let mut b = replica(right.iter().copied());
        b.merge(&replica(left.iter().copied())).unwrap();

        let total: i64 = history.values().sum();
        prop_assert_eq!(a.value(), total);
        prop_assert_eq!(&a, &b);
    }

    /// Property: re-applying operations does not change the value
    #[test]
    fn prop_apply_is_idempotent(ops in prop::collection::vec(arb_counter_operation(), 0..12)) {
        let once = replica(&ops);
        let mut twice = once.clone();
        for op in &ops {
            twice.apply_update(op).unwrap();
        }
        prop_assert_eq!(once.value(), twice.value());
    }
}

#[test]
fn rejects_malformed_payload() {
    let op = UpdateOperation::new(TripleTimestamp::new(Timestamp::new("dc-a", 1), 1), vec![1, 2, 3]);
    assert!(CounterObject::default().apply_update(&op).is_err());
}
