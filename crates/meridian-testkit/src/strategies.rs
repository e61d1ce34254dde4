//! Property test strategies for Meridian types
//!
//! Values are drawn from a small universe of sites and counters so that
//! generated clocks overlap often enough for interesting comparisons.

use meridian_core::{CausalityClock, Timestamp, TripleTimestamp, UpdateOperation};
use proptest::prelude::*;

// Re-export proptest for convenience
pub use proptest;

/// Sites used by the generators below
pub const SITES: [&str; 3] = ["dc-a", "dc-b", "dc-c"];

/// Highest counter the generators produce
pub const MAX_COUNTER: i64 = 12;

/// Timestamps over the fixed site set
pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    (0..SITES.len(), 1..=MAX_COUNTER).prop_map(|(site, counter)| Timestamp::new(SITES[site], counter))
}

/// Clocks built by recording random events, so exceptions appear naturally
pub fn arb_clock() -> impl Strategy<Value = CausalityClock> {
    prop::collection::vec(arb_timestamp(), 0..20).prop_map(|events| {
        let mut clock = CausalityClock::new();
        for ts in &events {
            clock.record(ts);
        }
        clock
    })
}

/// Triple timestamps with small secondary counters
pub fn arb_triple_timestamp() -> impl Strategy<Value = TripleTimestamp> {
    (arb_timestamp(), 1i64..8).prop_map(|(base, secondary)| TripleTimestamp::new(base, secondary))
}

/// Counter operations with small signed deltas
pub fn arb_counter_operation() -> impl Strategy<Value = UpdateOperation> {
    (arb_triple_timestamp(), -50i64..50)
        .prop_map(|(ts, delta)| crate::fixtures::CounterObject::operation(ts, delta))
}
